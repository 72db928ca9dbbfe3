//! Scripted remote API shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use annotator::actors::operation_queue::{OperationQueueActor, OperationQueueArguments};
use annotator::actors::QueueHandle;
use annotator::local_store::LocalStore;
use annotator::remote_api::{ApiError, RemoteApi};
use async_trait::async_trait;
use ractor::Actor;
use serde_json::Value;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: &'static str,
    pub target: String,
}

/// Fake REST API. Targets fail according to their script; every call is
/// logged. With a gate installed, each call waits for one permit first.
#[derive(Default)]
pub struct ScriptedApi {
    fail_times: Mutex<HashMap<String, u32>>,
    fail_always: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Fail the next `times` calls for `target`, then succeed.
    pub fn fail_times(self, target: &str, times: u32) -> Self {
        self.fail_times
            .lock()
            .unwrap()
            .insert(target.to_string(), times);
        self
    }

    pub fn fail_always(self, target: &str) -> Self {
        self.fail_always.lock().unwrap().push(target.to_string());
        self
    }

    pub fn recover(&self, target: &str) {
        self.fail_always.lock().unwrap().retain(|t| t != target);
        self.fail_times.lock().unwrap().remove(target);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.target).collect()
    }

    pub fn attempts_for(&self, target: &str) -> usize {
        self.calls().iter().filter(|call| call.target == target).count()
    }

    async fn answer(&self, method: &'static str, target: &str) -> Result<(), ApiError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls.lock().unwrap().push(Call {
            method,
            target: target.to_string(),
        });

        if self.fail_always.lock().unwrap().iter().any(|t| t == target) {
            return Err(ApiError::Transport(format!("{target} unreachable")));
        }
        let mut fail_times = self.fail_times.lock().unwrap();
        if let Some(remaining) = fail_times.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Status {
                    status: 503,
                    body: "service unavailable".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn create_project(&self, payload: &Value) -> Result<(), ApiError> {
        let target = payload["id"].as_str().unwrap_or_default().to_string();
        self.answer("create", &target).await
    }

    async fn update_project(&self, project_id: &str, _payload: &Value) -> Result<(), ApiError> {
        self.answer("update", project_id).await
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), ApiError> {
        self.answer("delete", project_id).await
    }
}

pub async fn spawn_queue(
    store: LocalStore,
    api: Arc<ScriptedApi>,
    retry_ceiling: u32,
    retry_backoff: Duration,
) -> QueueHandle {
    let (actor, _handle) = Actor::spawn(
        None,
        OperationQueueActor,
        OperationQueueArguments {
            local_store: store,
            remote_api: api,
            retry_ceiling,
            retry_backoff,
        },
    )
    .await
    .expect("spawn operation queue");
    QueueHandle::new(actor)
}

pub fn create_payload(project_id: &str) -> Option<Value> {
    Some(serde_json::json!({ "id": project_id, "name": format!("Project {project_id}") }))
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
