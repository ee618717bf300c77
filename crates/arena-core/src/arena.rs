//! The arena orchestrator
//!
//! Wires one experiment end to end:
//! - Validates the request
//! - Dispatches it to every configured model and settles all calls
//! - Records the run and applies the progression rules
//! - Offers the run to the history sink
//!
//! Also hosts the calling-layer policy for the saved-experiment library.

use crate::achievements::{Achievement, ProgressionRules};
use crate::backend::ModelBackendClient;
use crate::config::ArenaConfig;
use crate::dispatcher::ExperimentDispatcher;
use crate::error::ArenaError;
use crate::history::{HistoryPoint, HistoryRecord, HistorySink};
use crate::progression::ProgressionStore;
use crate::types::{ExperimentId, ExperimentOptions, ExperimentRun, ModelId, SavedExperiment};
use parking_lot::Mutex;
use std::sync::Arc;

/// Progression effects of one run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressionOutcome {
    /// XP granted for the run
    pub xp_gained: u64,
    /// XP after the run
    pub xp: u64,
    /// Level after the run
    pub level: u64,
    /// Whether the run crossed a level boundary
    pub leveled_up: bool,
    /// Achievements this run unlocked
    pub unlocked: Vec<Achievement>,
}

/// Everything a completed run produced
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentOutcome {
    pub run: ExperimentRun,
    pub progression: ProgressionOutcome,
}

/// Request behind the current results
///
/// Its lock is held while the results are recorded so the two always match.
#[derive(Debug, Clone)]
struct LastRequest {
    prompt: String,
    options: ExperimentOptions,
}

/// Experiment orchestrator over a shared progression store
pub struct Arena {
    dispatcher: ExperimentDispatcher,
    model_ids: Vec<ModelId>,
    default_options: ExperimentOptions,
    rules: ProgressionRules,
    store: Arc<ProgressionStore>,
    history: Option<Arc<dyn HistorySink>>,
    last_request: Mutex<Option<LastRequest>>,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("dispatcher", &self.dispatcher)
            .field("model_ids", &self.model_ids)
            .field("rules", &self.rules)
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Create arena from configuration
    #[must_use]
    pub fn new(
        config: &ArenaConfig,
        client: Arc<dyn ModelBackendClient>,
        store: Arc<ProgressionStore>,
    ) -> Self {
        let dispatcher = ExperimentDispatcher::new(client, config.roster())
            .with_timeout(config.timeout())
            .with_max_retries(config.max_retries);
        Self {
            dispatcher,
            model_ids: config.model_ids(),
            default_options: config.default_options.clone(),
            rules: config.rules.clone(),
            store,
            history: None,
            last_request: Mutex::new(None),
        }
    }

    /// With history sink
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// The shared store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ProgressionStore> {
        &self.store
    }

    /// Options used by [`Arena::run_default`]
    #[inline]
    #[must_use]
    pub fn default_options(&self) -> &ExperimentOptions {
        &self.default_options
    }

    /// Run with the configured default options
    ///
    /// # Errors
    /// See [`Arena::run_experiment`]
    pub async fn run_default(&self, prompt: &str) -> Result<ExperimentOutcome, ArenaError> {
        let options = self.default_options.clone();
        self.run_experiment(prompt, options).await
    }

    /// Run one experiment across every configured model
    ///
    /// Model failures never fail the run; they appear as failed results.
    ///
    /// # Errors
    /// `ArenaError::InvalidOptions` for a blank prompt, a temperature outside
    /// `[0, 2]` or a zero token limit. Nothing is dispatched in that case.
    pub async fn run_experiment(
        &self,
        prompt: &str,
        options: ExperimentOptions,
    ) -> Result<ExperimentOutcome, ArenaError> {
        validate_request(prompt, &options)?;
        tracing::info!(prompt_len = prompt.len(), "Starting experiment");

        let run = self.dispatcher.run(prompt, &self.model_ids, &options).await;

        {
            let mut last_request = self.last_request.lock();
            self.store.record_results(run.clone());
            *last_request = Some(LastRequest {
                prompt: prompt.to_string(),
                options,
            });
        }
        let progression = self.apply_progression(&run);

        if let Some(history) = &self.history {
            if let Err(e) = history.insert(HistoryRecord::from_run(prompt, &run)).await {
                tracing::warn!(error = %e, "Failed to record run history");
            }
        }

        Ok(ExperimentOutcome { run, progression })
    }

    /// Apply the trigger policy for a recorded run
    fn apply_progression(&self, run: &ExperimentRun) -> ProgressionOutcome {
        let count = self.store.increment_experiment_count();
        let xp = self.store.add_xp(self.rules.xp_per_run);

        let unlocked: Vec<Achievement> = self
            .rules
            .increments(run, count)
            .into_iter()
            .filter_map(|(id, delta)| self.store.update_achievement(id, delta).newly_unlocked())
            .collect();

        if xp.leveled_up() {
            tracing::info!(level = xp.level, "Level up");
        }

        ProgressionOutcome {
            xp_gained: self.rules.xp_per_run,
            xp: xp.xp,
            level: xp.level,
            leveled_up: xp.leveled_up(),
            unlocked,
        }
    }

    /// Save the current results under `name`
    ///
    /// # Errors
    /// `ArenaError::InvalidSave` for a blank name or when nothing has been
    /// run yet
    pub fn save_current(&self, name: &str) -> Result<SavedExperiment, ArenaError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ArenaError::InvalidSave("name is empty".to_string()));
        }
        let (request, results) = {
            let last_request = self.last_request.lock();
            let Some(request) = last_request.clone() else {
                return Err(ArenaError::InvalidSave("no experiment has been run".to_string()));
            };
            (request, self.store.read(|s| s.results.clone()))
        };
        let saved = SavedExperiment::new(name, request.prompt, &request.options, results);
        self.store.save_experiment(saved.clone());
        tracing::info!(id = %saved.id, name = %saved.name, "Experiment saved");
        Ok(saved)
    }

    /// One saved experiment
    ///
    /// # Errors
    /// `ArenaError::UnknownExperiment` when the id is not in the library
    pub fn load_saved(&self, id: &ExperimentId) -> Result<SavedExperiment, ArenaError> {
        self.store
            .saved_experiment(id)
            .ok_or_else(|| ArenaError::UnknownExperiment(id.clone()))
    }

    /// Delete a saved experiment
    ///
    /// # Errors
    /// `ArenaError::UnknownExperiment` when the id is not in the library
    pub fn delete_saved(&self, id: &ExperimentId) -> Result<(), ArenaError> {
        if self.store.delete_saved_experiment(id) {
            Ok(())
        } else {
            Err(ArenaError::UnknownExperiment(id.clone()))
        }
    }

    /// Library entries matching `query` by name or prompt
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<SavedExperiment> {
        self.store.search_saved(query)
    }

    /// Chart rows for the `limit` most recent runs, oldest first
    ///
    /// Empty when no history sink is attached.
    ///
    /// # Errors
    /// `ArenaError::History` when the sink cannot be read
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryPoint>, ArenaError> {
        let Some(history) = &self.history else {
            return Ok(Vec::new());
        };
        let records = history.recent(limit).await?;
        Ok(records.iter().rev().map(HistoryPoint::from_record).collect())
    }
}

/// Reject requests no backend should see
fn validate_request(prompt: &str, options: &ExperimentOptions) -> Result<(), ArenaError> {
    if prompt.trim().is_empty() {
        return Err(ArenaError::InvalidOptions("prompt is empty".to_string()));
    }
    if !options.temperature.is_finite() || !(0.0..=2.0).contains(&options.temperature) {
        return Err(ArenaError::InvalidOptions(format!(
            "temperature {} is outside [0, 2]",
            options.temperature
        )));
    }
    if options.max_tokens == 0 {
        return Err(ArenaError::InvalidOptions(
            "max_tokens must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
