//! # Identity Persistence
//!
//! A client actor persists exactly one value: its current [`ClientIdentifier`]. On start
//! it loads the last saved identifier (if any), derives the next generation from it and
//! saves that before accepting commands.
//!
//! Two stores are provided:
//!
//! - [`InMemorySnapshotStore`] for tests and demos; share one instance (it is cheap to
//!   clone) between successive actors to simulate restarts.
//! - [`FileSnapshotStore`] keeps one JSON file per persistence id.

use crate::error::PersistenceError;
use crate::identifier::ClientIdentifier;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable single-value store with replay.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// The last identifier saved under `persistence_id`.
    async fn load(&self, persistence_id: &str) -> Result<Option<ClientIdentifier>, PersistenceError>;

    /// Replaces whatever was saved under `persistence_id`.
    async fn save(
        &self,
        persistence_id: &str,
        identifier: &ClientIdentifier,
    ) -> Result<(), PersistenceError>;
}

#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<String, ClientIdentifier>>>,
    fail_saves: Arc<Mutex<Option<String>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `save` fail with `reason` (or succeed again with `None`).
    pub fn fail_saves(&self, reason: Option<&str>) {
        if let Ok(mut fail) = self.fail_saves.lock() {
            *fail = reason.map(str::to_string);
        }
    }

    pub fn get(&self, persistence_id: &str) -> Option<ClientIdentifier> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|snapshots| snapshots.get(persistence_id).cloned())
    }
}

fn poisoned<T>(_: T) -> PersistenceError {
    PersistenceError::Unavailable("snapshot store lock poisoned".to_string())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, persistence_id: &str) -> Result<Option<ClientIdentifier>, PersistenceError> {
        let snapshots = self.snapshots.lock().map_err(poisoned)?;
        Ok(snapshots.get(persistence_id).cloned())
    }

    async fn save(
        &self,
        persistence_id: &str,
        identifier: &ClientIdentifier,
    ) -> Result<(), PersistenceError> {
        if let Some(reason) = self.fail_saves.lock().map_err(poisoned)?.clone() {
            return Err(PersistenceError::Unavailable(reason));
        }
        let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
        snapshots.insert(persistence_id.to_string(), identifier.clone());
        debug!(persistence_id, %identifier, "Snapshot saved");
        Ok(())
    }
}

/// Stores each identifier as `<dir>/<persistence_id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, persistence_id: &str) -> PathBuf {
        let file: String = persistence_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, persistence_id: &str) -> Result<Option<ClientIdentifier>, PersistenceError> {
        let path = self.path_for(persistence_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        persistence_id: &str,
        identifier: &ClientIdentifier,
    ) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(persistence_id);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(identifier)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(persistence_id, %identifier, path = %path.display(), "Snapshot saved");
        Ok(())
    }
}
