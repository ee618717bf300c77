//! Core types for the arena
//!
//! Defines the data contract shared by the dispatcher, the progression store
//! and presentation consumers:
//! - Model identifiers and descriptors
//! - Per-model experiment results and whole runs
//! - Saved experiment snapshots

use arena_scoring::QualityMetrics;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use ulid::Ulid;

/// Opaque identifier of one backend model configuration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    /// Create a model id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ModelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A configured backend: its id, what it costs and what it accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier
    pub id: ModelId,
    /// Price per 1000 total tokens
    #[serde(default)]
    pub price_per_1k_tokens: f64,
    /// Whether the backend accepts a system turn
    #[serde(default = "default_true")]
    pub supports_system_prompt: bool,
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    /// Create descriptor
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<ModelId>, price_per_1k_tokens: f64) -> Self {
        Self {
            id: id.into(),
            price_per_1k_tokens,
            supports_system_prompt: true,
        }
    }

    /// Without system prompt support
    #[inline]
    #[must_use]
    pub fn without_system_prompt(mut self) -> Self {
        self.supports_system_prompt = false;
        self
    }
}

/// Configured models by id
///
/// Lookups of unlisted models fall back to a free model that accepts system
/// prompts, so an unknown id is never an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRoster(IndexMap<ModelId, ModelDescriptor>);

impl ModelRoster {
    /// Build from descriptors; a repeated id keeps its last descriptor
    #[must_use]
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        Self(models.into_iter().map(|m| (m.id.clone(), m)).collect())
    }

    /// Configured ids, in configuration order
    pub fn ids(&self) -> impl Iterator<Item = &ModelId> {
        self.0.keys()
    }

    /// Descriptor of a listed model
    #[inline]
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ModelDescriptor> {
        self.0.get(model)
    }

    /// Price per 1000 tokens, zero when the model is not listed
    #[inline]
    #[must_use]
    pub fn price_per_1k(&self, model: &str) -> f64 {
        self.get(model).map_or(0.0, |m| m.price_per_1k_tokens)
    }

    /// Cost of `total_tokens` on `model`
    #[inline]
    #[must_use]
    pub fn cost(&self, model: &str, total_tokens: u64) -> f64 {
        (total_tokens as f64 / 1000.0) * self.price_per_1k(model)
    }

    /// Whether `model` accepts a system turn; unlisted models are assumed to
    #[inline]
    #[must_use]
    pub fn supports_system_prompt(&self, model: &str) -> bool {
        self.get(model).map_or(true, |m| m.supports_system_prompt)
    }
}

/// Per-request knobs passed verbatim to every backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentOptions {
    /// Optional system turn prepended to the conversation
    pub system_prompt: Option<String>,
    /// Sampling temperature in `[0, 2]`
    pub temperature: f64,
    /// Completion token limit
    pub max_tokens: u32,
}

impl ExperimentOptions {
    /// Create options with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With system prompt
    #[inline]
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// With temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// With max tokens
    #[inline]
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for ExperimentOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Outcome of one model call
///
/// A failed call carries `failure` and zeroed numbers. Consumers branch on
/// `failure`, never on zero metrics: an empty, zero-token reply is a success.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Response text (empty on failure)
    pub text: String,
    /// Wall time from dispatch to response
    pub elapsed_seconds: f64,
    /// Prompt tokens billed
    pub prompt_tokens: u64,
    /// Completion tokens billed
    pub completion_tokens: u64,
    /// Prompt plus completion tokens
    pub total_tokens: u64,
    /// Cost at the configured price
    pub cost: f64,
    /// Quality signals of `text`
    pub quality: QualityMetrics,
    /// Human-readable failure, set only when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ExperimentResult {
    /// Successful result; `total_tokens` is derived and saturates
    #[must_use]
    pub fn success(
        text: impl Into<String>,
        elapsed_seconds: f64,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost: f64,
        quality: QualityMetrics,
    ) -> Self {
        Self {
            text: text.into(),
            elapsed_seconds,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            cost,
            quality,
            failure: None,
        }
    }

    /// Failed result with every number zeroed
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Whether the call succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// The settled results of one dispatch, keyed by model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperimentRun {
    /// Result per model, unique keys
    pub results_by_model: IndexMap<ModelId, ExperimentResult>,
}

impl ExperimentRun {
    /// Empty run
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result; an existing key is overwritten
    pub fn insert(&mut self, model: ModelId, result: ExperimentResult) {
        self.results_by_model.insert(model, result);
    }

    /// Result for a model
    #[inline]
    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ExperimentResult> {
        self.results_by_model.get(model)
    }

    /// Number of models in the run
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.results_by_model.len()
    }

    /// Whether the run has no results
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results_by_model.is_empty()
    }

    /// Iterate results
    pub fn iter(&self) -> impl Iterator<Item = (&ModelId, &ExperimentResult)> {
        self.results_by_model.iter()
    }

    /// Model ids in the run
    pub fn models(&self) -> impl Iterator<Item = &ModelId> {
        self.results_by_model.keys()
    }

    /// Total tokens across every result, failed ones included; saturates
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.results_by_model
            .values()
            .fold(0, |acc, r| acc.saturating_add(r.total_tokens))
    }

    /// Elapsed time of the fastest successful call
    #[must_use]
    pub fn fastest_success_secs(&self) -> Option<f64> {
        self.successes()
            .map(|(_, r)| r.elapsed_seconds)
            .min_by(f64::total_cmp)
    }

    /// Percentage of the run's tokens used by `model`; zero when the run used none
    #[must_use]
    pub fn token_share(&self, model: &str) -> f64 {
        let total = self.total_tokens();
        match self.get(model) {
            Some(r) if total > 0 => r.total_tokens as f64 / total as f64 * 100.0,
            _ => 0.0,
        }
    }

    /// Percentage of the run's cost spent on `model`; zero when the run was free
    #[must_use]
    pub fn cost_share(&self, model: &str) -> f64 {
        let total: f64 = self.results_by_model.values().map(|r| r.cost).sum();
        match self.get(model) {
            Some(r) if total > 0.0 => r.cost / total * 100.0,
            _ => 0.0,
        }
    }

    /// Aggregate view for dashboards
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        for (model, result) in self.iter() {
            summary.total_elapsed_secs += result.elapsed_seconds;
            summary.total_tokens = summary.total_tokens.saturating_add(result.total_tokens);
            summary.total_cost += result.cost;

            if !result.is_success() {
                summary.failed += 1;
                continue;
            }
            summary.succeeded += 1;

            if summary
                .fastest
                .as_ref()
                .map_or(true, |(_, secs)| result.elapsed_seconds < *secs)
            {
                summary.fastest = Some((model.clone(), result.elapsed_seconds));
            }
            if summary
                .cheapest
                .as_ref()
                .map_or(true, |(_, cost)| result.cost < *cost)
            {
                summary.cheapest = Some((model.clone(), result.cost));
            }
            if summary
                .best_quality
                .as_ref()
                .map_or(true, |(_, q)| result.quality.overall > *q)
            {
                summary.best_quality = Some((model.clone(), result.quality.overall));
            }
        }

        summary
    }

    fn successes(&self) -> impl Iterator<Item = (&ModelId, &ExperimentResult)> {
        self.iter().filter(|(_, r)| r.is_success())
    }
}

impl FromIterator<(ModelId, ExperimentResult)> for ExperimentRun {
    fn from_iter<I: IntoIterator<Item = (ModelId, ExperimentResult)>>(iter: I) -> Self {
        Self {
            results_by_model: iter.into_iter().collect(),
        }
    }
}

/// Aggregates over one run; leaders consider successful results only
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total_elapsed_secs: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub fastest: Option<(ModelId, f64)>,
    pub cheapest: Option<(ModelId, f64)>,
    pub best_quality: Option<(ModelId, f64)>,
}

/// Unique saved experiment identifier (ULID for sortability)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Generate a fresh id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ExperimentId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a run plus the request that produced it
///
/// Immutable once saved; the library only appends and deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedExperiment {
    pub id: ExperimentId,
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub results: ExperimentRun,
    pub created_at: DateTime<Utc>,
}

impl SavedExperiment {
    /// Snapshot `results` under a fresh id, stamped now
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        options: &ExperimentOptions,
        results: ExperimentRun,
    ) -> Self {
        Self {
            id: ExperimentId::new(),
            name: name.into(),
            prompt: prompt.into(),
            system_prompt: options.system_prompt.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            results,
            created_at: Utc::now(),
        }
    }

    /// Options that reproduce this experiment
    #[must_use]
    pub fn options(&self) -> ExperimentOptions {
        ExperimentOptions {
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Case-insensitive match on name or prompt
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query) || self.prompt.to_lowercase().contains(&query)
    }
}
