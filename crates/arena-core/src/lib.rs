//! Arena Core - experiment orchestration and progression
//!
//! Sends one prompt to several model backends at once and keeps score:
//! - Concurrent settle-all dispatch with per-model failure isolation
//! - Quality, token and cost accounting per response
//! - Persisted progression: XP, levels and one-shot achievements
//! - Saved experiment library with model id migration on load
//!
//! # Example
//!
//! ```rust,ignore
//! use arena_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(client: Arc<dyn ModelBackendClient>) -> Result<(), ArenaError> {
//! let config = ArenaConfig::load("arena.toml")?;
//! let persister = JsonFilePersister::new("state.json");
//! let store = Arc::new(ProgressionStore::open(
//!     &persister,
//!     &config.achievements,
//!     &config.migrations,
//! ));
//!
//! let arena = Arena::new(&config, client, store);
//! let outcome = arena.run_default("Explain ownership in one paragraph").await?;
//! for achievement in &outcome.progression.unlocked {
//!     println!("Unlocked {}", achievement.description);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod achievements;
pub mod arena;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod migration;
pub mod persistence;
pub mod progression;
pub mod types;

pub use achievements::{
    default_catalog, Achievement, AchievementDef, AchievementUpdate, IconTag, ProgressionRules,
};
pub use arena::{Arena, ExperimentOutcome, ProgressionOutcome};
pub use backend::{BackendRequest, BackendResponse, ChatMessage, ChatRole, ModelBackendClient};
pub use config::ArenaConfig;
pub use dispatcher::{ExperimentDispatcher, DEFAULT_TIMEOUT};
pub use error::{ArenaError, BackendError, ConfigError, HistoryError, PersistError};
pub use history::{HistoryEntry, HistoryPoint, HistoryRecord, HistorySink, InMemoryHistory};
pub use migration::{
    migrate, migrate_stored, migrate_with_report, MigrationReport, MigrationTable,
};
pub use persistence::{JsonFilePersister, PersistenceWorker, StatePersister};
pub use progression::{level_for, ProgressionState, ProgressionStore, StateObserver, XpChange};
pub use types::{
    ExperimentId, ExperimentOptions, ExperimentResult, ExperimentRun, ModelDescriptor, ModelId,
    ModelRoster, RunSummary, SavedExperiment,
};

pub use arena_scoring::{QualityMetrics, QualityScorer};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Arena Core
    pub use crate::{
        Arena, ArenaConfig, ArenaError, ExperimentOptions, ExperimentRun, JsonFilePersister,
        ModelBackendClient, ModelId, ProgressionStore, SavedExperiment,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
