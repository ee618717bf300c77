//! Durable progression state
//!
//! - [`StatePersister`]: load/save seam for the whole state document
//! - [`JsonFilePersister`]: pretty JSON file, replaced atomically via rename
//! - [`PersistenceWorker`]: store observer that writes snapshots in the
//!   background, coalescing bursts so only the newest state is written

use crate::error::PersistError;
use crate::progression::{ProgressionState, StateObserver};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Storage for the progression state document
pub trait StatePersister: Send + Sync {
    /// Load the stored state; `None` when nothing was stored yet
    ///
    /// # Errors
    /// I/O failure or an undecodable document
    fn load(&self) -> Result<Option<ProgressionState>, PersistError>;

    /// Replace the stored state
    ///
    /// # Errors
    /// I/O or encoding failure
    fn save(&self, state: &ProgressionState) -> Result<(), PersistError>;
}

/// State document as a JSON file
#[derive(Debug, Clone)]
pub struct JsonFilePersister {
    path: PathBuf,
}

impl JsonFilePersister {
    /// Persister for `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatePersister for JsonFilePersister {
    fn load(&self) -> Result<Option<ProgressionState>, PersistError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, state: &ProgressionState) -> Result<(), PersistError> {
        let json = serde_json::to_vec_pretty(state)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = json.len(), "State saved");
        Ok(())
    }
}

/// Background writer fed by store transitions
///
/// The worker task ends once every handle to this observer is dropped, after
/// writing whatever was still queued.
#[derive(Debug)]
pub struct PersistenceWorker {
    tx: mpsc::UnboundedSender<ProgressionState>,
}

impl PersistenceWorker {
    /// Start the worker on the current tokio runtime
    ///
    /// Register the returned observer with the store; await the handle to
    /// flush after the store is dropped.
    #[must_use]
    pub fn spawn(persister: Arc<dyn StatePersister>) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(persister, rx));
        (Arc::new(Self { tx }), handle)
    }
}

impl StateObserver for PersistenceWorker {
    fn state_changed(&self, state: &ProgressionState) {
        if self.tx.send(state.clone()).is_err() {
            warn!("Persistence worker stopped, state change not saved");
        }
    }
}

async fn write_loop(
    persister: Arc<dyn StatePersister>,
    mut rx: mpsc::UnboundedReceiver<ProgressionState>,
) {
    while let Some(mut latest) = rx.recv().await {
        let mut skipped = 0usize;
        while let Ok(newer) = rx.try_recv() {
            latest = newer;
            skipped += 1;
        }
        if skipped > 0 {
            debug!(skipped, "Coalesced queued snapshots");
        }

        let persister = Arc::clone(&persister);
        match tokio::task::spawn_blocking(move || persister.save(&latest)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist progression state"),
            Err(e) => warn!(error = %e, "Persistence write task failed"),
        }
    }
    debug!("Persistence worker finished");
}
