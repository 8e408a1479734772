//! EndpointQueue - 1 つの endpoint 専用のキュー
//!
//! QueueClient を継承ではなく合成で持ち、endpoint ごとのキー導出と
//! enqueue 時の Task 状態更新（-> WaitingForEp）を足したもの。

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::config::ConnectionInfo;
use crate::domain::keys::{self, ENDPOINT_FIELD, STATUS_FIELD};
use crate::domain::{EndpointId, Task, TaskId, TaskState};
use crate::error::QueueError;
use crate::impls::{HashTaskStore, RedisConnector};
use crate::ports::{Connector, TaskStore};

use super::QueueClient;

/// Queue of task ids waiting for one endpoint (`task_<endpoint>_list`).
pub struct EndpointQueue<C: Connector> {
    client: QueueClient<C>,
    endpoint: EndpointId,
    queue_name: String,
}

impl EndpointQueue<RedisConnector> {
    pub fn redis(endpoint: EndpointId, info: ConnectionInfo) -> Self {
        Self::new(endpoint, info, RedisConnector)
    }
}

impl<C: Connector> EndpointQueue<C> {
    /// 接続はしない（`connect()` を呼ぶこと）
    pub fn new(endpoint: EndpointId, info: ConnectionInfo, connector: C) -> Self {
        let client = QueueClient::new(keys::endpoint_prefix(&endpoint), info, connector);
        let queue_name = client.list_key();
        Self {
            client,
            endpoint,
            queue_name,
        }
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn client(&self) -> &QueueClient<C> {
        &self.client
    }

    pub async fn connect(&mut self) -> Result<(), QueueError> {
        self.client.connect().await
    }

    pub async fn reconnect(&mut self) -> Result<(), QueueError> {
        self.client.reconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// タスクをこの endpoint のキューに積む
    ///
    /// `endpoint` と `status = WaitingForEp` の 2 フィールドをレコードに書いてから
    /// task_id を末尾に積み、成功したら `task` にも反映する。Task 本体のレコードは
    /// 呼び出し側で作成済みであること（存在確認はしない）。
    pub async fn enqueue(&self, task: &mut Task) -> Result<(), QueueError> {
        self.client.store()?;

        let status = TaskState::WaitingForEp;
        self.client
            .push_with_fields(
                &task.task_id,
                &[
                    (STATUS_FIELD, status.as_str()),
                    (ENDPOINT_FIELD, self.endpoint.as_str()),
                ],
            )
            .await?;

        task.endpoint = Some(self.endpoint.clone());
        task.status = status;
        debug!(endpoint = %self.endpoint, task_id = %task.task_id, "enqueued");
        Ok(())
    }

    /// 最大 `timeout` 待ってタスクを 1 件取り出す。タイムアウトなら `Ok(None)`
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let Some(task_id) = self.client.pop_id(timeout).await? else {
            return Ok(None);
        };

        let tasks = self.task_store()?;
        let found = tasks
            .from_id(&task_id)
            .await
            .map_err(|err| self.client.lift(err))?;
        let task = found.ok_or(QueueError::TaskNotFound(task_id))?;
        debug!(endpoint = %self.endpoint, task_id = %task.task_id, "dequeued");
        Ok(Some(task))
    }

    /// このキューの接続上の TaskStore
    pub fn task_store(&self) -> Result<HashTaskStore<C::Store>, QueueError> {
        Ok(HashTaskStore::new(self.client.store()?.clone()))
    }

    pub async fn len(&self) -> Result<usize, QueueError> {
        self.client.len().await
    }

    pub async fn pending(&self) -> Result<Vec<TaskId>, QueueError> {
        self.client.pending().await
    }
}

impl<C: Connector> fmt::Display for EndpointQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<EndpointQueue {} at {}>", self.endpoint, self.client.connection_info())
    }
}

impl<C: Connector> fmt::Debug for EndpointQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointQueue")
            .field("endpoint", &self.endpoint)
            .field("queue_name", &self.queue_name)
            .field("client", &self.client)
            .finish()
    }
}
