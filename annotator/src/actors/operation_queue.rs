//! OperationQueueActor - durable replay queue for backend mutations.
//!
//! Owns the persisted [`QueueState`] record. Every mutation of the queue is
//! written through to the [`LocalStore`] before the message handler returns.
//!
//! # Drain protocol
//!
//! 1. `Drain` snapshots the current operations, sets `is_processing` (persisted)
//!    and spawns the replay task. A `Drain` arriving while `is_processing` is set
//!    is a no-op.
//! 2. The replay task calls the [`RemoteApi`] once per operation, in enqueue
//!    order, and reports back with `DrainFinished`.
//! 3. `DrainFinished` removes successes, bumps `retry_count` on failures and
//!    drops operations that reached the retry ceiling. If any failure remains
//!    queued, another `Drain` is scheduled after the backoff delay.
//!
//! Operations enqueued while a replay task runs are appended to the queue but
//! are not part of the running pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::Value;
use shared_types::{DrainReport, OperationKind, PendingOperation, QueueState};
use tokio::task::JoinHandle;

use crate::annotations::OperationSink;
use crate::local_store::LocalStore;
use crate::remote_api::{ApiError, RemoteApi};

pub const DEFAULT_RETRY_CEILING: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct OperationQueueActor;

#[derive(Clone)]
pub struct OperationQueueArguments {
    pub local_store: LocalStore,
    pub remote_api: Arc<dyn RemoteApi>,
    pub retry_ceiling: u32,
    pub retry_backoff: Duration,
}

pub struct OperationQueueState {
    local_store: LocalStore,
    remote_api: Arc<dyn RemoteApi>,
    queue: QueueState,
    retry_ceiling: u32,
    retry_backoff: Duration,
    backoff_timer: Option<JoinHandle<()>>,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub enum OperationQueueMsg {
    /// Append a pending operation with `retry_count = 0`
    Enqueue {
        kind: OperationKind,
        target_id: String,
        payload: Option<Value>,
    },
    /// Start a drain pass; the optional port receives the report when it ends
    Drain {
        reply: Option<RpcReplyPort<DrainReport>>,
    },
    /// Internal: replay task finished
    DrainFinished {
        outcomes: Vec<OperationOutcome>,
        reply: Option<RpcReplyPort<DrainReport>>,
    },
    /// Discard every queued operation
    Clear,
    PendingCount {
        reply: RpcReplyPort<usize>,
    },
    PendingOperations {
        reply: RpcReplyPort<Vec<PendingOperation>>,
    },
}

#[derive(Debug)]
pub struct OperationOutcome {
    pub operation_id: String,
    pub result: Result<(), ApiError>,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum QueueError {
    #[error("Operation queue RPC error: {0}")]
    Rpc(String),
}

#[async_trait]
impl Actor for OperationQueueActor {
    type Msg = OperationQueueMsg;
    type State = OperationQueueState;
    type Arguments = OperationQueueArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let loading = args.local_store.clone();
        let mut queue = tokio::task::spawn_blocking(move || loading.load_queue_state())
            .await
            .map_err(|e| format!("spawn_blocking panicked: {e}"))?;
        if queue.is_processing {
            // Only this process drains the store, so a set flag means the
            // previous process died mid-drain.
            tracing::warn!(
                actor_id = %myself.get_id(),
                pending = queue.operations.len(),
                "Previous drain was interrupted; clearing processing flag"
            );
            queue.is_processing = false;
            let saving = args.local_store.clone();
            let snapshot = queue.clone();
            tokio::task::spawn_blocking(move || saving.save_queue_state(&snapshot))
                .await
                .map_err(|e| format!("spawn_blocking panicked: {e}"))?;
        }

        tracing::info!(
            actor_id = %myself.get_id(),
            pending = queue.operations.len(),
            retry_ceiling = args.retry_ceiling,
            "OperationQueueActor starting"
        );

        Ok(OperationQueueState {
            local_store: args.local_store,
            remote_api: args.remote_api,
            queue,
            retry_ceiling: args.retry_ceiling.max(1),
            retry_backoff: args.retry_backoff,
            backoff_timer: None,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.backoff_timer.take() {
            timer.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            OperationQueueMsg::Enqueue {
                kind,
                target_id,
                payload,
            } => {
                let operation = PendingOperation::new(kind, target_id, payload);
                tracing::debug!(
                    operation_id = %operation.id,
                    kind = %operation.kind,
                    target_id = %operation.target_id,
                    "Enqueued pending operation"
                );
                state.queue.operations.push(operation);
                state.persist().await;
            }
            OperationQueueMsg::Drain { reply } => {
                self.handle_drain(&myself, state, reply).await;
            }
            OperationQueueMsg::DrainFinished { outcomes, reply } => {
                let report = self.handle_drain_finished(&myself, state, outcomes).await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            OperationQueueMsg::Clear => {
                let discarded = state.queue.operations.len();
                state.queue.operations.clear();
                state.persist().await;
                tracing::info!(discarded, "Cleared pending operation queue");
            }
            OperationQueueMsg::PendingCount { reply } => {
                let _ = reply.send(state.queue.operations.len());
            }
            OperationQueueMsg::PendingOperations { reply } => {
                let _ = reply.send(state.queue.operations.clone());
            }
        }
        Ok(())
    }
}

impl OperationQueueState {
    /// Write the queue record through to the local store off the runtime
    /// threads. Awaited inside the handler, so the next message still sees
    /// the persisted state.
    async fn persist(&self) {
        let store = self.local_store.clone();
        let queue = self.queue.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.save_queue_state(&queue)).await {
            tracing::error!(error = %e, "Queue persistence task failed");
        }
    }
}

impl OperationQueueActor {
    async fn handle_drain(
        &self,
        myself: &ActorRef<OperationQueueMsg>,
        state: &mut OperationQueueState,
        reply: Option<RpcReplyPort<DrainReport>>,
    ) {
        if state.queue.is_processing {
            tracing::debug!("Drain already in progress; skipping");
            if let Some(reply) = reply {
                let _ = reply.send(DrainReport {
                    skipped: true,
                    ..DrainReport::default()
                });
            }
            return;
        }
        if state.queue.operations.is_empty() {
            if let Some(reply) = reply {
                let _ = reply.send(DrainReport::default());
            }
            return;
        }

        if let Some(timer) = state.backoff_timer.take() {
            timer.abort();
        }

        state.queue.is_processing = true;
        state.persist().await;

        let batch = state.queue.operations.clone();
        tracing::info!(operations = batch.len(), "Draining pending operations");

        let api = Arc::clone(&state.remote_api);
        let queue_ref = myself.clone();
        tokio::spawn(async move {
            let ids: Vec<String> = batch.iter().map(|op| op.id.clone()).collect();
            let outcomes = match tokio::spawn(replay_batch(api, batch)).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    tracing::error!(error = %e, "Replay task aborted; counting whole batch as failed");
                    ids.into_iter()
                        .map(|operation_id| OperationOutcome {
                            operation_id,
                            result: Err(ApiError::Transport(format!("replay task failed: {e}"))),
                        })
                        .collect()
                }
            };
            if let Err(e) = queue_ref.cast(OperationQueueMsg::DrainFinished { outcomes, reply }) {
                tracing::error!(error = %e, "Operation queue stopped before drain completed");
            }
        });
    }

    async fn handle_drain_finished(
        &self,
        myself: &ActorRef<OperationQueueMsg>,
        state: &mut OperationQueueState,
        outcomes: Vec<OperationOutcome>,
    ) -> DrainReport {
        let mut report = DrainReport {
            attempted: outcomes.len(),
            ..DrainReport::default()
        };

        for outcome in outcomes {
            // Missing means the queue was cleared while the pass ran.
            let Some(pos) = state
                .queue
                .operations
                .iter()
                .position(|op| op.id == outcome.operation_id)
            else {
                continue;
            };

            match outcome.result {
                Ok(()) => {
                    let done = state.queue.operations.remove(pos);
                    report.succeeded += 1;
                    tracing::debug!(
                        operation_id = %done.id,
                        kind = %done.kind,
                        target_id = %done.target_id,
                        "Replayed pending operation"
                    );
                }
                Err(err) => {
                    let operation = &mut state.queue.operations[pos];
                    operation.retry_count += 1;
                    if operation.retry_count < state.retry_ceiling {
                        report.retained += 1;
                        tracing::warn!(
                            operation_id = %operation.id,
                            kind = %operation.kind,
                            target_id = %operation.target_id,
                            retry_count = operation.retry_count,
                            error = %err,
                            "Replay failed; operation stays queued"
                        );
                    } else {
                        let dropped = state.queue.operations.remove(pos);
                        report.dropped += 1;
                        // No dead-letter storage: the mutation is lost here.
                        tracing::error!(
                            operation_id = %dropped.id,
                            kind = %dropped.kind,
                            target_id = %dropped.target_id,
                            retry_count = dropped.retry_count,
                            error = %err,
                            "Dropping operation after reaching retry ceiling"
                        );
                    }
                }
            }
        }

        state.queue.is_processing = false;
        state.persist().await;

        if report.retained > 0 {
            self.schedule_backoff(myself, state);
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            retained = report.retained,
            dropped = report.dropped,
            pending = state.queue.operations.len(),
            "Drain pass finished"
        );
        report
    }

    fn schedule_backoff(&self, myself: &ActorRef<OperationQueueMsg>, state: &mut OperationQueueState) {
        if let Some(timer) = state.backoff_timer.take() {
            timer.abort();
        }
        let delay = state.retry_backoff;
        let queue_ref = myself.clone();
        state.backoff_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue_ref.cast(OperationQueueMsg::Drain { reply: None });
        }));
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Scheduled retry drain");
    }
}

async fn replay_batch(api: Arc<dyn RemoteApi>, batch: Vec<PendingOperation>) -> Vec<OperationOutcome> {
    let mut outcomes = Vec::with_capacity(batch.len());
    for operation in batch {
        let result = dispatch(api.as_ref(), &operation).await;
        outcomes.push(OperationOutcome {
            operation_id: operation.id,
            result,
        });
    }
    outcomes
}

async fn dispatch(api: &dyn RemoteApi, operation: &PendingOperation) -> Result<(), ApiError> {
    let payload = operation.payload.clone().unwrap_or(Value::Null);
    match operation.kind {
        OperationKind::Create => api.create_project(&payload).await,
        OperationKind::Update => api.update_project(&operation.target_id, &payload).await,
        OperationKind::Delete => api.delete_project(&operation.target_id).await,
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap, cloneable front for the queue actor used by the engine, the
/// connectivity monitor and annotation write-behind.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    actor: ActorRef<OperationQueueMsg>,
}

impl QueueHandle {
    pub fn new(actor: ActorRef<OperationQueueMsg>) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &ActorRef<OperationQueueMsg> {
        &self.actor
    }

    pub fn enqueue(&self, kind: OperationKind, target_id: impl Into<String>, payload: Option<Value>) {
        let target_id = target_id.into();
        if let Err(e) = self.actor.cast(OperationQueueMsg::Enqueue {
            kind,
            target_id: target_id.clone(),
            payload,
        }) {
            tracing::error!(kind = %kind, target_id = %target_id, error = %e, "Failed to enqueue operation");
        }
    }

    /// Fire-and-forget drain request.
    pub fn drain(&self) {
        if let Err(e) = self.actor.cast(OperationQueueMsg::Drain { reply: None }) {
            tracing::error!(error = %e, "Failed to request drain");
        }
    }

    /// Run a drain pass and wait for its report.
    pub async fn drain_and_wait(&self) -> Result<DrainReport, QueueError> {
        ractor::call!(self.actor, |reply| OperationQueueMsg::Drain {
            reply: Some(reply)
        })
        .map_err(|e| QueueError::Rpc(e.to_string()))
    }

    pub fn clear(&self) {
        if let Err(e) = self.actor.cast(OperationQueueMsg::Clear) {
            tracing::error!(error = %e, "Failed to clear operation queue");
        }
    }

    pub async fn pending_count(&self) -> usize {
        match ractor::call!(self.actor, |reply| OperationQueueMsg::PendingCount { reply }) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Pending count unavailable");
                0
            }
        }
    }

    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>, QueueError> {
        ractor::call!(self.actor, |reply| OperationQueueMsg::PendingOperations {
            reply
        })
        .map_err(|e| QueueError::Rpc(e.to_string()))
    }
}

impl OperationSink for QueueHandle {
    fn enqueue(&self, kind: OperationKind, target_id: &str, payload: Option<Value>) {
        QueueHandle::enqueue(self, kind, target_id, payload);
    }
}
