//! Testing utilities for the Prompt Arena workspace
//!
//! Shared test helpers and fixtures.

#![allow(missing_docs)]

use arena_core::{
    AchievementDef, ArenaConfig, BackendError, BackendRequest, BackendResponse, ExperimentOptions,
    ExperimentResult, ExperimentRun, ModelBackendClient, ModelDescriptor, ModelId,
    ProgressionState, ProgressionStore, SavedExperiment,
};
use arena_scoring::QualityMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How a scripted model behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer immediately
    Reply(BackendResponse),
    /// Answer after a delay
    Delayed(Duration, BackendResponse),
    /// Fail with an error
    Fail(BackendError),
    /// Never answer
    Hang,
    /// Panic inside the call
    Panic(String),
}

impl Script {
    pub fn reply(text: &str, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self::Reply(BackendResponse::new(text, prompt_tokens, completion_tokens))
    }

    pub fn delayed(delay: Duration, text: &str, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self::Delayed(delay, BackendResponse::new(text, prompt_tokens, completion_tokens))
    }

    pub fn transport_error(message: &str) -> Self {
        Self::Fail(BackendError::Transport(message.to_string()))
    }
}

/// Backend whose models follow fixed scripts
///
/// Unscripted models are rejected. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: HashMap<ModelId, Script>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// With script for `model`
    pub fn with(mut self, model: &str, script: Script) -> Self {
        self.scripts.insert(ModelId::from(model), script);
        self
    }

    /// Requests seen so far, in arrival order
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().clone()
    }

    /// Number of calls made for `model`
    pub fn calls_to(&self, model: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.model.as_str() == model)
            .count()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl ModelBackendClient for ScriptedBackend {
    async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let script = self.scripts.get(&request.model).cloned();
        let model = request.model.clone();
        self.requests.lock().push(request);

        match script {
            Some(Script::Reply(response)) => Ok(response),
            Some(Script::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Panic(message)) => panic!("{message}"),
            None => Err(BackendError::Rejected(format!("unknown model {model}"))),
        }
    }
}

/// Config with free models named `ids` and a short timeout
pub fn config_for(ids: &[&str], timeout: Duration) -> ArenaConfig {
    ArenaConfig::new()
        .with_models(ids.iter().map(|id| ModelDescriptor::new(*id, 0.0)))
        .with_timeout(timeout)
}

/// Store with a fresh state for `catalog`
pub fn fresh_store(catalog: &[AchievementDef]) -> Arc<ProgressionStore> {
    Arc::new(ProgressionStore::new(ProgressionState::with_catalog(catalog)))
}

/// Successful result with fixed numbers
pub fn ok_result(text: &str, elapsed_seconds: f64, total_tokens: u64) -> ExperimentResult {
    ExperimentResult::success(
        text,
        elapsed_seconds,
        0,
        total_tokens,
        0.0,
        QualityMetrics::zero(),
    )
}

/// Saved experiment whose results are keyed by `models`
pub fn saved_with_models(name: &str, models: &[&str]) -> SavedExperiment {
    let run: ExperimentRun = models
        .iter()
        .map(|m| (ModelId::from(*m), ok_result(m, 1.0, 10)))
        .collect();
    SavedExperiment::new(name, format!("prompt for {name}"), &ExperimentOptions::default(), run)
}
