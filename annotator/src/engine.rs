//! SyncEngine - wires the local store, operation queue, connectivity monitor
//! and annotation write-behind into one explicitly started and stopped unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ractor::{Actor, ActorRef};
use serde_json::Value;
use shared_types::{ConnectivityState, DrainReport, OperationKind, PendingOperation};
use tokio::task::{AbortHandle, JoinHandle};

use crate::actors::connectivity::{
    current_state, ConnectivityMonitorActor, ConnectivityMonitorArguments, ConnectivityMonitorMsg,
    ConnectivityProbe,
};
use crate::actors::operation_queue::{
    OperationQueueActor, OperationQueueArguments, OperationQueueMsg, QueueError, QueueHandle,
};
use crate::annotations::{AnnotationStore, WriteBehind};
use crate::config::SyncConfig;
use crate::local_store::LocalStore;
use crate::remote_api::RemoteApi;

#[derive(Debug, thiserror::Error, Clone)]
pub enum EngineError {
    #[error("Failed to spawn {actor}: {reason}")]
    Spawn { actor: &'static str, reason: String },

    #[error("Engine RPC error: {0}")]
    Rpc(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// An opened project: its annotation store plus the write-behind flush loop
/// feeding the durable store and the queue.
#[derive(Debug)]
pub struct OpenProject {
    pub annotations: AnnotationStore,
    pub flush_loop: JoinHandle<()>,
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncEngineInner>,
}

struct SyncEngineInner {
    config: SyncConfig,
    local_store: LocalStore,
    queue: QueueHandle,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    monitor: ActorRef<ConnectivityMonitorMsg>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    open_projects: Mutex<HashMap<String, Vec<ProjectWriter>>>,
}

/// Write path of one `open_project` call, kept so deletes can cut it off.
struct ProjectWriter {
    write_behind: WriteBehind,
    flush_loop: AbortHandle,
}

impl ProjectWriter {
    fn close(self) {
        self.write_behind.close();
        self.flush_loop.abort();
    }
}

impl SyncEngine {
    /// Open the SQLite store named in `config` and start the actors.
    pub async fn start(
        config: SyncConfig,
        remote_api: Arc<dyn RemoteApi>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self, EngineError> {
        let local_store = LocalStore::open(&config.database_path);
        Self::start_with_store(config, local_store, remote_api, probe).await
    }

    pub async fn start_with_store(
        config: SyncConfig,
        local_store: LocalStore,
        remote_api: Arc<dyn RemoteApi>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Result<Self, EngineError> {
        let (queue_actor, queue_task) = Actor::spawn(
            Some(format!("operation_queue:{}", ulid::Ulid::new())),
            OperationQueueActor,
            OperationQueueArguments {
                local_store: local_store.clone(),
                remote_api,
                retry_ceiling: config.retry_ceiling,
                retry_backoff: config.retry_backoff,
            },
        )
        .await
        .map_err(|e| EngineError::Spawn {
            actor: "operation queue",
            reason: e.to_string(),
        })?;
        let queue = QueueHandle::new(queue_actor.clone());

        let initial_state = ConnectivityState::from_connected(probe.is_connected().await);
        let spawned = Actor::spawn(
            Some(format!("connectivity_monitor:{}", ulid::Ulid::new())),
            ConnectivityMonitorActor,
            ConnectivityMonitorArguments {
                queue: queue.clone(),
                probe,
                probe_interval: config.probe_interval,
                initial_state,
            },
        )
        .await;
        let (monitor, monitor_task) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                queue_actor.stop(None);
                return Err(EngineError::Spawn {
                    actor: "connectivity monitor",
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(
            database_path = %config.database_path.display(),
            api_base_url = %config.api_base_url,
            connectivity = ?initial_state,
            "Sync engine started"
        );

        Ok(Self {
            inner: Arc::new(SyncEngineInner {
                config,
                local_store,
                queue,
                queue_task: Mutex::new(Some(queue_task)),
                monitor,
                monitor_task: Mutex::new(Some(monitor_task)),
                open_projects: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Stop the actors and close the store. Staged annotation snapshots that
    /// were not flushed are not written.
    pub async fn shutdown(&self) {
        let open = std::mem::take(
            &mut *self
                .inner
                .open_projects
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for writer in open.into_values().flatten() {
            writer.flush_loop.abort();
        }

        self.inner.monitor.stop(None);
        let monitor_task = self
            .inner
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = monitor_task {
            let _ = task.await;
        }

        self.inner.queue.actor().stop(None);
        let queue_task = self
            .inner
            .queue_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = queue_task {
            let _ = task.await;
        }

        let store = self.inner.local_store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.close()).await {
            tracing::error!(error = %e, "Local store close task failed");
        }
        tracing::info!("Sync engine stopped");
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn local_store(&self) -> &LocalStore {
        &self.inner.local_store
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.inner.queue
    }

    pub fn monitor(&self) -> &ActorRef<ConnectivityMonitorMsg> {
        &self.inner.monitor
    }

    pub fn queue_actor(&self) -> &ActorRef<OperationQueueMsg> {
        self.inner.queue.actor()
    }

    // ------------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------------

    pub fn create_project(&self, project_id: &str, payload: Value) {
        self.inner
            .queue
            .enqueue(OperationKind::Create, project_id, Some(payload));
    }

    pub fn update_project(&self, project_id: &str, payload: Value) {
        self.inner
            .queue
            .enqueue(OperationKind::Update, project_id, Some(payload));
    }

    /// Enqueue a remote delete and drop the local copy. Open stores for the
    /// project stop persisting: their staged snapshot is discarded and later
    /// edits are not written.
    pub fn delete_project(&self, project_id: &str) {
        let writers = self
            .inner
            .open_projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id)
            .unwrap_or_default();
        if !writers.is_empty() {
            tracing::debug!(
                project_id = %project_id,
                open = writers.len(),
                "Closing open annotation stores for deleted project"
            );
        }
        for writer in writers {
            writer.close();
        }

        self.inner
            .queue
            .enqueue(OperationKind::Delete, project_id, None);
        self.inner.local_store.remove_snapshot(project_id);
    }

    /// Load the project's stored snapshot (or start empty) and wire its
    /// write-behind to the store and queue.
    pub fn open_project(&self, project_id: &str, user_id: &str) -> OpenProject {
        let annotations = match self.inner.local_store.load_snapshot(project_id) {
            Some(snapshot) => {
                tracing::debug!(
                    project_id = %project_id,
                    cell_labels = snapshot.cell_labels.len(),
                    row_labels = snapshot.row_labels.len(),
                    "Loaded stored annotations"
                );
                AnnotationStore::from_snapshot(snapshot, user_id)
            }
            None => AnnotationStore::new(project_id, user_id),
        };

        let write_behind = WriteBehind::new(
            self.inner.local_store.clone(),
            Arc::new(self.inner.queue.clone()),
        );
        let flush_loop = write_behind.spawn_flush_loop(self.inner.config.flush_interval);
        self.inner
            .open_projects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(project_id.to_string())
            .or_default()
            .push(ProjectWriter {
                write_behind: write_behind.clone(),
                flush_loop: flush_loop.abort_handle(),
            });

        OpenProject {
            annotations: annotations.with_write_behind(write_behind),
            flush_loop,
        }
    }

    // ------------------------------------------------------------------------
    // Platform passthrough
    // ------------------------------------------------------------------------

    pub fn set_online(&self) {
        if let Err(e) = self.inner.monitor.cast(ConnectivityMonitorMsg::PlatformOnline) {
            tracing::error!(error = %e, "Failed to forward online event");
        }
    }

    pub fn set_offline(&self) {
        if let Err(e) = self.inner.monitor.cast(ConnectivityMonitorMsg::PlatformOffline) {
            tracing::error!(error = %e, "Failed to forward offline event");
        }
    }

    pub async fn connectivity(&self) -> Result<ConnectivityState, EngineError> {
        current_state(&self.inner.monitor)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.pending_count().await
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>, EngineError> {
        Ok(self.inner.queue.pending_operations().await?)
    }

    pub fn drain(&self) {
        self.inner.queue.drain();
    }

    pub async fn drain_and_wait(&self) -> Result<DrainReport, EngineError> {
        Ok(self.inner.queue.drain_and_wait().await?)
    }

    pub fn clear(&self) {
        self.inner.queue.clear();
    }
}
