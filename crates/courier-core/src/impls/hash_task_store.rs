//! HashTaskStore - `task_<task_id>` hash を正本とする TaskStore
//!
//! payload（kind -> JSON）と同じ hash に `status` / `endpoint` / `created_at` を置く。

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::keys::{self, CREATED_AT_FIELD, ENDPOINT_FIELD, STATUS_FIELD};
use crate::domain::{EndpointId, Task, TaskId, TaskState};
use crate::error::StoreError;
use crate::ports::{QueueStore, TaskStore};

#[derive(Debug, Clone)]
pub struct HashTaskStore<S> {
    store: S,
}

impl<S: QueueStore> HashTaskStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: QueueStore> TaskStore for HashTaskStore<S> {
    async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let key = keys::task_key(&task.task_id);
        self.store
            .hset(&key, STATUS_FIELD, task.status.as_str())
            .await?;
        if let Some(endpoint) = &task.endpoint {
            self.store
                .hset(&key, ENDPOINT_FIELD, endpoint.as_str())
                .await?;
        }
        self.store
            .hset(&key, CREATED_AT_FIELD, &Utc::now().to_rfc3339())
            .await
    }

    async fn from_id(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        let key = keys::task_key(task_id);
        let Some(raw_status) = self.store.hget(&key, STATUS_FIELD).await? else {
            return Ok(None);
        };
        let status = raw_status
            .parse::<TaskState>()
            .map_err(|e| StoreError::Command(format!("{key}: {e}")))?;
        let endpoint = self
            .store
            .hget(&key, ENDPOINT_FIELD)
            .await?
            .map(EndpointId::from);

        Ok(Some(Task {
            task_id: task_id.clone(),
            status,
            endpoint,
        }))
    }

    async fn set_status(&self, task: &mut Task, status: TaskState) -> Result<(), StoreError> {
        self.store
            .hset(&keys::task_key(&task.task_id), STATUS_FIELD, status.as_str())
            .await?;
        task.status = status;
        Ok(())
    }

    async fn set_payload(
        &self,
        task_id: &TaskId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.store
            .hset(&keys::task_key(task_id), kind, &payload.to_string())
            .await
    }
}
