//! Write-behind buffer between the annotation store and durable storage.
//!
//! Mutations stage the latest project snapshot; a flush writes it to the
//! local store and enqueues one `update` operation for the project. Staging
//! again before a flush replaces the staged snapshot, so bursts of edits
//! coalesce into a single write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use shared_types::{OperationKind, ProjectAnnotations};
use tokio::task::JoinHandle;

use crate::local_store::LocalStore;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

/// Destination for durable operation intents.
pub trait OperationSink: Send + Sync {
    fn enqueue(&self, kind: OperationKind, target_id: &str, payload: Option<Value>);
}

#[derive(Clone)]
pub struct WriteBehind {
    inner: Arc<WriteBehindInner>,
}

struct WriteBehindInner {
    staging: Mutex<Staging>,
    local_store: LocalStore,
    sink: Arc<dyn OperationSink>,
}

#[derive(Default)]
struct Staging {
    snapshot: Option<ProjectAnnotations>,
    closed: bool,
}

impl std::fmt::Debug for WriteBehind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBehind")
            .field("has_staged", &self.has_staged())
            .finish_non_exhaustive()
    }
}

impl WriteBehind {
    pub fn new(local_store: LocalStore, sink: Arc<dyn OperationSink>) -> Self {
        Self {
            inner: Arc::new(WriteBehindInner {
                staging: Mutex::new(Staging::default()),
                local_store,
                sink,
            }),
        }
    }

    fn staging(&self) -> MutexGuard<'_, Staging> {
        self.inner
            .staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the staged snapshot. Ignored once closed.
    pub fn stage(&self, snapshot: ProjectAnnotations) {
        let mut staging = self.staging();
        if !staging.closed {
            staging.snapshot = Some(snapshot);
        }
    }

    pub fn has_staged(&self) -> bool {
        self.staging().snapshot.is_some()
    }

    /// Discard the staged snapshot and refuse further writes. A flush already
    /// in progress completes before this returns.
    pub fn close(&self) {
        let mut staging = self.staging();
        staging.closed = true;
        if staging.snapshot.take().is_some() {
            tracing::debug!("Discarded staged snapshot on close");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.staging().closed
    }

    /// Persist the staged snapshot, if any. Returns whether anything was written.
    ///
    /// Blocks on local store I/O; async callers go through `spawn_blocking`.
    pub fn flush(&self) -> bool {
        // Held for the whole write so `close` cannot interleave with it.
        let mut staging = self.staging();
        let Some(snapshot) = staging.snapshot.take() else {
            return false;
        };

        self.inner.local_store.save_snapshot(&snapshot);

        match serde_json::to_value(&snapshot) {
            Ok(payload) => {
                self.inner
                    .sink
                    .enqueue(OperationKind::Update, &snapshot.project_id, Some(payload));
            }
            Err(e) => {
                tracing::error!(
                    project_id = %snapshot.project_id,
                    error = %e,
                    "Failed to encode project snapshot; remote update skipped"
                );
            }
        }
        drop(staging);

        tracing::debug!(
            project_id = %snapshot.project_id,
            cell_labels = snapshot.cell_labels.len(),
            row_labels = snapshot.row_labels.len(),
            "Flushed annotation snapshot"
        );
        true
    }

    /// Flush on a fixed interval until the returned task is aborted.
    pub fn spawn_flush_loop(&self, interval: Duration) -> JoinHandle<()> {
        let write_behind = self.clone();
        let interval = interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let flushing = write_behind.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || flushing.flush()).await {
                    tracing::error!(error = %e, "Write-behind flush task failed");
                }
                if write_behind.is_closed() {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        operations: Mutex<Vec<(OperationKind, String)>>,
    }

    impl OperationSink for RecordingSink {
        fn enqueue(&self, kind: OperationKind, target_id: &str, _payload: Option<Value>) {
            self.operations
                .lock()
                .unwrap()
                .push((kind, target_id.to_string()));
        }
    }

    #[test]
    fn test_flush_without_staged_snapshot_is_noop() {
        let sink = Arc::new(RecordingSink::default());
        let write_behind = WriteBehind::new(LocalStore::in_memory(), sink.clone());
        assert!(!write_behind.flush());
        assert!(sink.operations.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restaging_coalesces_into_one_update() {
        let store = LocalStore::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let write_behind = WriteBehind::new(store.clone(), sink.clone());

        write_behind.stage(ProjectAnnotations::empty("p1"));
        let mut latest = ProjectAnnotations::empty("p1");
        latest.labels.push(shared_types::Label::new("urgent", "#f00"));
        write_behind.stage(latest);

        assert!(write_behind.flush());
        assert!(!write_behind.has_staged());
        assert_eq!(
            *sink.operations.lock().unwrap(),
            vec![(OperationKind::Update, "p1".to_string())]
        );
        assert_eq!(store.load_snapshot("p1").unwrap().labels.len(), 1);
    }

    #[test]
    fn test_close_discards_staged_snapshot_and_blocks_writes() {
        let store = LocalStore::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let write_behind = WriteBehind::new(store.clone(), sink.clone());

        write_behind.stage(ProjectAnnotations::empty("p1"));
        write_behind.close();
        assert!(!write_behind.has_staged());

        write_behind.stage(ProjectAnnotations::empty("p1"));
        assert!(!write_behind.flush());
        assert!(store.load_snapshot("p1").is_none());
        assert!(sink.operations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_loop_exits_after_close() {
        let write_behind = WriteBehind::new(
            LocalStore::in_memory(),
            Arc::new(RecordingSink::default()),
        );
        let task = write_behind.spawn_flush_loop(Duration::from_millis(20));
        write_behind.close();

        let finished = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_flush_loop_writes_staged_snapshot() {
        let store = LocalStore::in_memory();
        let sink = Arc::new(RecordingSink::default());
        let write_behind = WriteBehind::new(store.clone(), sink.clone());
        let task = write_behind.spawn_flush_loop(Duration::from_millis(20));

        write_behind.stage(ProjectAnnotations::empty("p1"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.load_snapshot("p1").is_some());
        assert_eq!(sink.operations.lock().unwrap().len(), 1);
        task.abort();
    }
}
