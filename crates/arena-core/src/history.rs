//! Durable run history
//!
//! Every completed run is offered to a [`HistorySink`]. The sink is a
//! collaborator: a failed insert is logged by the caller and never fails the
//! run.

use crate::error::HistoryError;
use crate::types::{ExperimentId, ExperimentRun, ModelId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One model's part of a recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub model: ModelId,
    pub response: String,
    pub elapsed_seconds: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// One recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: ExperimentId,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<HistoryEntry>,
}

impl HistoryRecord {
    /// Record `run` for `prompt`, stamped now
    #[must_use]
    pub fn from_run(prompt: impl Into<String>, run: &ExperimentRun) -> Self {
        let entries = run
            .iter()
            .map(|(model, r)| HistoryEntry {
                model: model.clone(),
                response: r.text.clone(),
                elapsed_seconds: r.elapsed_seconds,
                prompt_tokens: r.prompt_tokens,
                completion_tokens: r.completion_tokens,
                total_tokens: r.total_tokens,
                cost: r.cost,
                failure: r.failure.clone(),
            })
            .collect();

        Self {
            id: ExperimentId::new(),
            prompt: prompt.into(),
            created_at: Utc::now(),
            entries,
        }
    }
}

/// Chart row for a recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// e.g. `Mar 4, 09:15`
    pub label: String,
    /// Prompt length in characters
    pub prompt_length: usize,
    /// Elapsed seconds per model
    pub response_times: IndexMap<ModelId, f64>,
}

impl HistoryPoint {
    /// Chart row for `record`
    #[must_use]
    pub fn from_record(record: &HistoryRecord) -> Self {
        Self {
            label: record.created_at.format("%b %-d, %H:%M").to_string(),
            prompt_length: record.prompt.chars().count(),
            response_times: record
                .entries
                .iter()
                .map(|e| (e.model.clone(), e.elapsed_seconds))
                .collect(),
        }
    }
}

/// Durable store of completed runs
#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Append a record
    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError>;

    /// Up to `limit` records, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError>;
}

/// Process-local history
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.records.read().iter().rev().take(limit).cloned().collect())
    }
}
