//! Durable local store - key-value persistence for the pending-operation
//! queue and per-project annotation snapshots.
//!
//! # Architecture
//!
//! - [`KvStore`] is the fallible backend seam (`get`/`set`/`remove`)
//! - [`SqliteKvStore`] persists to a single `kv` table (file or in-memory)
//! - [`MemoryKvStore`] keeps everything in a `HashMap`
//! - [`LocalStore`] wraps a backend with the infallible contract the rest of
//!   the core relies on: every failure is logged and read back as empty state
//!
//! There is no global instance. The engine constructs one store with
//! [`LocalStore::init`] and hands clones to the components that need it;
//! [`LocalStore::close`] is the teardown.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = LocalStore::open("./data/annotator.db");
//! let mut queue = store.load_queue_state();
//! queue.operations.push(PendingOperation::new(OperationKind::Create, "p1", None));
//! store.save_queue_state(&queue);
//! ```

mod memory;
mod sqlite;

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{ProjectAnnotations, QueueState};

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

/// Key of the single queue-state record
pub const QUEUE_STATE_KEY: &str = "annotator.queue";

const PROJECT_KEY_PREFIX: &str = "annotator.project.";

pub fn project_snapshot_key(project_id: &str) -> String {
    format!("{PROJECT_KEY_PREFIX}{project_id}")
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Store is closed")]
    Closed,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Backend seam
// ============================================================================

/// Synchronous key-value backend.
pub trait KvStore: Send + Sync {
    /// Prepare the medium (schema, directories). Called once by [`LocalStore::init`].
    fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// LocalStore
// ============================================================================

/// Shared handle over a [`KvStore`] backend. Cloning shares the backend.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KvStore>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    pub fn init(backend: Arc<dyn KvStore>) -> Self {
        if let Err(e) = backend.init() {
            tracing::error!(error = %e, "Local store initialization failed; continuing with degraded persistence");
        }
        Self { backend }
    }

    /// Open a SQLite-backed store at `path`.
    ///
    /// If the database cannot be opened the session falls back to an
    /// in-memory backend so annotation work can continue without durability.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match SqliteKvStore::open(path) {
            Ok(backend) => {
                tracing::info!(database_path = %path.display(), "Opened local store");
                Self::init(Arc::new(backend))
            }
            Err(e) => {
                tracing::error!(
                    database_path = %path.display(),
                    error = %e,
                    "Failed to open local store; falling back to in-memory state"
                );
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::init(Arc::new(MemoryKvStore::default()))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, error = %e, "Local store read failed");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set(key, value) {
            tracing::error!(key, error = %e, "Local store write failed");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            tracing::error!(key, error = %e, "Local store remove failed");
        }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key, error = %e, "Corrupt record in local store; treating as empty");
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw),
            Err(e) => tracing::error!(key, error = %e, "Failed to encode record for local store"),
        }
    }

    pub fn load_queue_state(&self) -> QueueState {
        self.get_json(QUEUE_STATE_KEY).unwrap_or_default()
    }

    pub fn save_queue_state(&self, state: &QueueState) {
        self.set_json(QUEUE_STATE_KEY, state);
    }

    pub fn load_snapshot(&self, project_id: &str) -> Option<ProjectAnnotations> {
        self.get_json(&project_snapshot_key(project_id))
    }

    pub fn save_snapshot(&self, snapshot: &ProjectAnnotations) {
        self.set_json(&project_snapshot_key(&snapshot.project_id), snapshot);
    }

    pub fn remove_snapshot(&self, project_id: &str) {
        self.remove(&project_snapshot_key(project_id));
    }

    pub fn close(&self) {
        if let Err(e) = self.backend.close() {
            tracing::warn!(error = %e, "Local store close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{OperationKind, PendingOperation};

    /// Backend where every call fails, like a full or corrupted medium.
    struct FailingKvStore;

    impl KvStore for FailingKvStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Database("disk I/O error".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Database("database or disk is full".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Database("disk I/O error".to_string()))
        }
    }

    #[test]
    fn test_queue_state_round_trips_through_store() {
        let store = LocalStore::in_memory();
        let mut state = QueueState::default();
        state
            .operations
            .push(PendingOperation::new(OperationKind::Create, "p1", None));
        state.is_processing = true;
        store.save_queue_state(&state);

        assert_eq!(store.load_queue_state(), state);
    }

    #[test]
    fn test_missing_queue_reads_as_empty() {
        let store = LocalStore::in_memory();
        let state = store.load_queue_state();
        assert!(state.operations.is_empty());
        assert!(!state.is_processing);
    }

    #[test]
    fn test_corrupt_queue_reads_as_empty() {
        let store = LocalStore::in_memory();
        store.set(QUEUE_STATE_KEY, "{not json");
        assert_eq!(store.load_queue_state(), QueueState::default());
    }

    #[test]
    fn test_failing_backend_degrades_to_empty_state() {
        let store = LocalStore::init(Arc::new(FailingKvStore));
        store.save_queue_state(&QueueState::default());
        store.remove_snapshot("p1");

        assert_eq!(store.get("anything"), None);
        assert_eq!(store.load_queue_state(), QueueState::default());
        assert!(store.load_snapshot("p1").is_none());
    }

    #[test]
    fn test_snapshots_are_keyed_per_project() {
        let store = LocalStore::in_memory();
        store.save_snapshot(&ProjectAnnotations::empty("alpha"));
        store.save_snapshot(&ProjectAnnotations::empty("beta"));

        assert_eq!(store.load_snapshot("alpha").unwrap().project_id, "alpha");
        assert!(store.get(&project_snapshot_key("beta")).is_some());

        store.remove_snapshot("alpha");
        assert!(store.load_snapshot("alpha").is_none());
        assert!(store.load_snapshot("beta").is_some());
    }
}
