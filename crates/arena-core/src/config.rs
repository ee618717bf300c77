//! Arena configuration
//!
//! One TOML document names the active models and their prices, the per-call
//! timeout, default request options, the model id migration table, the
//! achievement catalog and the trigger policy.

use crate::achievements::{default_catalog, AchievementDef, ProgressionRules};
use crate::error::ConfigError;
use crate::migration::MigrationTable;
use crate::types::{ExperimentOptions, ModelDescriptor, ModelId, ModelRoster};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Arena configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Active models, in dispatch order
    pub models: Vec<ModelDescriptor>,
    /// Bound on each backend call
    pub request_timeout_secs: f64,
    /// Extra attempts after a timeout or transport error
    pub max_retries: u32,
    /// Options used when a caller supplies none
    pub default_options: ExperimentOptions,
    /// Retired model id -> current model id
    pub migrations: MigrationTable,
    /// Achievement catalog
    pub achievements: Vec<AchievementDef>,
    /// Which achievements a run drives
    pub rules: ProgressionRules,
    /// Where the progression state document lives
    pub state_path: Option<PathBuf>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            models: vec![
                ModelDescriptor::new("gpt-4", 0.03),
                ModelDescriptor::new("llama-3.3-70b", 0.0001),
                ModelDescriptor::new("gemma2-9b", 0.0001),
            ],
            request_timeout_secs: 60.0,
            max_retries: 0,
            default_options: ExperimentOptions::default(),
            migrations: MigrationTable::new()
                .with_rename("llama-70b", "llama-3.3-70b")
                .with_rename("mixtral", "gemma2-9b"),
            achievements: default_catalog(),
            rules: ProgressionRules::default(),
            state_path: None,
        }
    }
}

impl ArenaConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Parse failure or any [`ArenaConfig::validate`] rejection
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// I/O failure, parse failure or a validation rejection
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// With models
    #[must_use]
    pub fn with_models(mut self, models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        self.models = models.into_iter().collect();
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs_f64();
        self
    }

    /// With retry limit for retryable backend failures
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// With default options
    #[inline]
    #[must_use]
    pub fn with_default_options(mut self, options: ExperimentOptions) -> Self {
        self.default_options = options;
        self
    }

    /// With migration table
    #[inline]
    #[must_use]
    pub fn with_migrations(mut self, migrations: MigrationTable) -> Self {
        self.migrations = migrations;
        self
    }

    /// With achievement catalog
    #[must_use]
    pub fn with_achievements(mut self, achievements: Vec<AchievementDef>) -> Self {
        self.achievements = achievements;
        self
    }

    /// With trigger policy
    #[must_use]
    pub fn with_rules(mut self, rules: ProgressionRules) -> Self {
        self.rules = rules;
        self
    }

    /// With state document path
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// The first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.request_timeout_secs.is_finite() || self.request_timeout_secs <= 0.0 {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }

        let mut seen = IndexSet::new();
        for model in &self.models {
            if !seen.insert(&model.id) {
                return Err(ConfigError::DuplicateModel(model.id.clone()));
            }
            let price = model.price_per_1k_tokens;
            if !price.is_finite() || price < 0.0 {
                return Err(ConfigError::InvalidPrice {
                    model: model.id.clone(),
                    price,
                });
            }
        }

        let mut ids = IndexSet::new();
        for def in &self.achievements {
            if def.target == 0 {
                return Err(invalid_achievement(def, "target must be greater than zero"));
            }
            if !ids.insert(def.id.as_str()) {
                return Err(invalid_achievement(def, "duplicate id"));
            }
        }

        self.migrations.validate()
    }

    /// Prices and capabilities of the configured models
    #[must_use]
    pub fn roster(&self) -> ModelRoster {
        ModelRoster::new(self.models.iter().cloned())
    }

    /// Configured model ids, in order
    #[must_use]
    pub fn model_ids(&self) -> Vec<ModelId> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    /// Per-call timeout
    ///
    /// Falls back to 60 seconds for an unvalidated, unusable value.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs)
            .unwrap_or(crate::dispatcher::DEFAULT_TIMEOUT)
    }
}

fn invalid_achievement(def: &AchievementDef, reason: &str) -> ConfigError {
    ConfigError::InvalidAchievement {
        id: def.id.clone(),
        reason: reason.to_string(),
    }
}
