//! Model id migration for persisted experiments
//!
//! Rewrites result keys of saved experiments from retired model ids to their
//! replacements. Each key is renamed at most once per pass: the table is never
//! iterated to a fixed point, so a chained or cyclic table cannot loop.

use crate::achievements::AchievementDef;
use crate::error::{ArenaError, ConfigError};
use crate::persistence::StatePersister;
use crate::progression::{level_for, ProgressionState};
use crate::types::{ExperimentRun, ModelId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Retired model id -> current model id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationTable(IndexMap<ModelId, ModelId>);

impl MigrationTable {
    /// Empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With one rename
    #[must_use]
    pub fn with_rename(mut self, retired: impl Into<ModelId>, current: impl Into<ModelId>) -> Self {
        self.0.insert(retired.into(), current.into());
        self
    }

    /// Replacement for a retired id
    #[inline]
    #[must_use]
    pub fn replacement(&self, model: &str) -> Option<&ModelId> {
        self.0.get(model)
    }

    /// Number of renames
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no renames
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject tables where a replacement is itself retired
    ///
    /// Single-pass migration is idempotent only for chain-free tables.
    ///
    /// # Errors
    /// `ConfigError::MigrationChain` naming the first offending rename
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (from, to) in &self.0 {
            if self.0.contains_key(to) {
                return Err(ConfigError::MigrationChain {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        Ok(())
    }

    /// Rename the keys of one run; returns how many keys were renamed
    ///
    /// When a renamed key lands on a key already present, the entry processed
    /// later wins.
    pub fn apply_to_run(&self, run: &mut ExperimentRun) -> usize {
        if self.is_empty() {
            return 0;
        }
        let mut renamed = 0;
        let entries = std::mem::take(&mut run.results_by_model);

        for (model, result) in entries {
            let key = match self.replacement(model.as_str()) {
                Some(current) => {
                    renamed += 1;
                    current.clone()
                }
                None => model,
            };
            run.results_by_model.insert(key, result);
        }
        renamed
    }
}

impl FromIterator<(ModelId, ModelId)> for MigrationTable {
    fn from_iter<I: IntoIterator<Item = (ModelId, ModelId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a migration pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Saved experiments with at least one renamed key
    pub experiments_touched: usize,
    /// Result keys renamed
    pub keys_renamed: usize,
}

/// Rewrite retired model ids in every saved experiment
#[must_use]
pub fn migrate(state: ProgressionState, table: &MigrationTable) -> ProgressionState {
    migrate_with_report(state, table).0
}

/// [`migrate`], also reporting what changed
#[must_use]
pub fn migrate_with_report(
    mut state: ProgressionState,
    table: &MigrationTable,
) -> (ProgressionState, MigrationReport) {
    let mut report = MigrationReport::default();

    for saved in &mut state.saved_experiments {
        let renamed = table.apply_to_run(&mut saved.results);
        if renamed > 0 {
            report.experiments_touched += 1;
            report.keys_renamed += renamed;
        }
    }

    (state, report)
}

/// Migrate the stored state document in place
///
/// Also reconciles the achievement catalog and recomputes the level. Returns
/// `None` when nothing is stored yet.
///
/// # Errors
/// `ArenaError::Persist` when the document cannot be read, decoded or written
pub fn migrate_stored(
    persister: &dyn StatePersister,
    catalog: &[AchievementDef],
    table: &MigrationTable,
) -> Result<Option<MigrationReport>, ArenaError> {
    let Some(mut state) = persister.load()? else {
        return Ok(None);
    };
    state.reconcile_catalog(catalog);
    state.level = level_for(state.xp);

    let (state, report) = migrate_with_report(state, table);
    persister.save(&state)?;
    info!(
        renamed = report.keys_renamed,
        experiments = report.experiments_touched,
        "Stored state migrated"
    );
    Ok(Some(report))
}
