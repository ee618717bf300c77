//! Achievements and the post-run trigger policy
//!
//! An achievement accumulates progress toward a fixed target and unlocks once.
//! After unlocking it is frozen: further updates neither add progress nor
//! re-stamp the unlock time, so the unlock notification fires at most once.

use crate::types::ExperimentRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Presentation hint for an achievement badge
///
/// Resolved to a glyph by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IconTag {
    #[default]
    Trophy,
    Rocket,
    Flask,
    Zap,
    Coins,
    Star,
    Library,
}

/// Catalog entry: how an achievement is earned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementDef {
    /// Unique identifier
    pub id: String,
    /// How to earn it
    pub description: String,
    /// Progress needed to unlock, greater than zero
    pub target: u64,
    /// Badge hint
    #[serde(default)]
    pub icon: IconTag,
}

impl AchievementDef {
    /// Create definition
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>, target: u64, icon: IconTag) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            target,
            icon,
        }
    }
}

/// Default catalog ids
pub mod ids {
    pub const FIRST_EXPERIMENT: &str = "first-experiment";
    pub const EXPERIMENTER: &str = "experimenter";
    pub const SPEED_DEMON: &str = "speed-demon";
    pub const TOKEN_MASTER: &str = "token-master";
}

/// The built-in catalog
#[must_use]
pub fn default_catalog() -> Vec<AchievementDef> {
    vec![
        AchievementDef::new(ids::FIRST_EXPERIMENT, "Run your first experiment", 1, IconTag::Rocket),
        AchievementDef::new(ids::EXPERIMENTER, "Run 10 experiments", 10, IconTag::Flask),
        AchievementDef::new(
            ids::SPEED_DEMON,
            "Get a response in under 2 seconds",
            1,
            IconTag::Zap,
        ),
        AchievementDef::new(ids::TOKEN_MASTER, "Use 10,000 tokens", 10_000, IconTag::Coins),
    ]
}

/// Live achievement state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub icon: IconTag,
    pub target: u64,
    pub progress: u64,
    pub unlocked: bool,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl Achievement {
    /// Fresh, locked achievement for a definition
    #[must_use]
    pub fn from_def(def: &AchievementDef) -> Self {
        Self {
            id: def.id.clone(),
            description: def.description.clone(),
            icon: def.icon,
            target: def.target,
            progress: 0,
            unlocked: false,
            unlocked_at: None,
        }
    }

    /// Add progress; returns whether this call unlocked it
    ///
    /// No-op once unlocked.
    pub fn advance(&mut self, delta: u64, now: DateTime<Utc>) -> bool {
        if self.unlocked {
            return false;
        }
        self.progress = self.progress.saturating_add(delta);
        self.unlocked = self.progress >= self.target;
        if self.unlocked {
            self.unlocked_at = Some(now);
        }
        self.unlocked
    }

    /// Fraction of the target reached, in `[0, 1]`
    #[must_use]
    pub fn completion(&self) -> f64 {
        if self.unlocked || self.target == 0 {
            return 1.0;
        }
        (self.progress as f64 / self.target as f64).min(1.0)
    }
}

/// Result of `update_achievement`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AchievementUpdate {
    /// No achievement with that id
    Missing,
    /// Already unlocked; returned unchanged
    AlreadyUnlocked(Achievement),
    /// Progress added, still locked
    Progressed(Achievement),
    /// This update unlocked it
    Unlocked(Achievement),
}

impl AchievementUpdate {
    /// The achievement, if it exists
    #[must_use]
    pub fn achievement(&self) -> Option<&Achievement> {
        match self {
            Self::Missing => None,
            Self::AlreadyUnlocked(a) | Self::Progressed(a) | Self::Unlocked(a) => Some(a),
        }
    }

    /// The achievement, only if this update unlocked it
    #[must_use]
    pub fn newly_unlocked(self) -> Option<Achievement> {
        match self {
            Self::Unlocked(a) => Some(a),
            _ => None,
        }
    }
}

/// Which achievements a completed run drives, and by how much
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionRules {
    /// XP granted per completed run
    pub xp_per_run: u64,
    /// Fastest successful reply must be strictly below this
    pub low_latency_threshold_secs: f64,
    /// +1 when the experiment count goes from 0 to 1
    pub first_run: String,
    /// +1 per run
    pub volume: String,
    /// +1 per run with a fast enough reply
    pub low_latency: String,
    /// +total tokens per run
    pub token_volume: String,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            xp_per_run: 25,
            low_latency_threshold_secs: 2.0,
            first_run: ids::FIRST_EXPERIMENT.to_string(),
            volume: ids::EXPERIMENTER.to_string(),
            low_latency: ids::SPEED_DEMON.to_string(),
            token_volume: ids::TOKEN_MASTER.to_string(),
        }
    }
}

impl ProgressionRules {
    /// Achievement increments earned by `run`
    ///
    /// `experiment_count` is the count after this run was counted. Failed
    /// results contribute their (zero) tokens and still count as a run, but
    /// never qualify as the fastest reply.
    #[must_use]
    pub fn increments(&self, run: &ExperimentRun, experiment_count: u64) -> Vec<(&str, u64)> {
        let mut increments = Vec::with_capacity(4);

        if experiment_count == 1 {
            increments.push((self.first_run.as_str(), 1));
        }
        increments.push((self.volume.as_str(), 1));

        if run
            .fastest_success_secs()
            .is_some_and(|secs| secs < self.low_latency_threshold_secs)
        {
            increments.push((self.low_latency.as_str(), 1));
        }

        let tokens = run.total_tokens();
        if tokens > 0 {
            increments.push((self.token_volume.as_str(), tokens));
        }

        increments
    }
}
