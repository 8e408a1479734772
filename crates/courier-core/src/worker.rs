use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{Task, TaskState};
use crate::error::{QueueError, StoreError};
use crate::ports::{Connector, TaskStore};
use crate::queue::EndpointQueue;

/// Payload kind written when a handler succeeds.
pub const RESULT_KIND: &str = "result";
/// Payload kind written when a handler fails.
pub const EXCEPTION_KIND: &str = "exception";

/// Lower bound for the worker poll timeout and error backoff.
/// 0 だと blocking pop が無期限待ちになり、shutdown を確認できなくなる。
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Executes a dequeued task. The returned value is stored under [`RESULT_KIND`].
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, String>;
}

/// Worker group handle.
/// - 各ワーカーは自分専用の `EndpointQueue`（= 自分専用の接続）を持つ
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn one worker per queue.
    ///
    /// 未接続のキューはワーカー側で接続する。
    /// `poll_timeout` は [`MIN_POLL_TIMEOUT`] 未満なら切り上げる。
    pub fn spawn<C>(
        queues: Vec<EndpointQueue<C>>,
        handler: Arc<dyn TaskHandler>,
        poll_timeout: Duration,
    ) -> Self
    where
        C: Connector + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poll_timeout = poll_timeout.max(MIN_POLL_TIMEOUT);

        let mut joins = Vec::with_capacity(queues.len());
        for (worker_id, queue) in queues.into_iter().enumerate() {
            let handler = Arc::clone(&handler);
            let rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, queue, handler, poll_timeout, rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// 実行中の blocking pop は中断しない（取り出したタスクを落とさないため）。
    /// 各ワーカーは遅くとも poll_timeout 後に止まる。
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop<C: Connector>(
    worker_id: usize,
    mut queue: EndpointQueue<C>,
    handler: Arc<dyn TaskHandler>,
    poll_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let backoff = poll_timeout;
    info!(worker_id, endpoint = %queue.endpoint(), "worker started");

    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        if !queue.is_connected() && queue.connect().await.is_err() {
            // 接続エラーは QueueClient 側でログ済み
            tokio::time::sleep(backoff).await;
            continue;
        }

        let task = match queue.dequeue(poll_timeout).await {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(err) if err.is_connection() => {
                warn!(worker_id, "store connection lost, reconnecting");
                tokio::time::sleep(backoff).await;
                // 失敗したら次の周回で connect() をやり直す
                let _ = queue.reconnect().await;
                continue;
            }
            Err(err) => {
                // WRONGTYPE などは毎回同じ失敗になるので、空回りしないよう待つ
                error!(worker_id, error = %err, "dequeue failed");
                tokio::time::sleep(backoff).await;
                continue;
            }
        };

        let task_id = task.task_id.clone();
        if let Err(err) = run_task(&queue, handler.as_ref(), task).await {
            error!(worker_id, %task_id, error = %err, "failed to record task outcome");
        }
    }

    info!(worker_id, endpoint = %queue.endpoint(), "worker stopped");
}

/// Running -> handler -> Success / Failed
async fn run_task<C: Connector>(
    queue: &EndpointQueue<C>,
    handler: &dyn TaskHandler,
    mut task: Task,
) -> Result<(), QueueError> {
    let tasks = queue.task_store()?;
    let lift = |err: StoreError| queue.client().lift(err);

    tasks
        .set_status(&mut task, TaskState::Running)
        .await
        .map_err(lift)?;

    match handler.handle(&task).await {
        Ok(value) => {
            tasks
                .set_payload(&task.task_id, RESULT_KIND, &value)
                .await
                .map_err(lift)?;
            tasks
                .set_status(&mut task, TaskState::Success)
                .await
                .map_err(lift)?;
            debug!(task_id = %task.task_id, "task succeeded");
        }
        Err(message) => {
            warn!(task_id = %task.task_id, error = %message, "task failed");
            tasks
                .set_payload(&task.task_id, EXCEPTION_KIND, &json!({ "error": message }))
                .await
                .map_err(lift)?;
            tasks
                .set_status(&mut task, TaskState::Failed)
                .await
                .map_err(lift)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionInfo;
    use crate::domain::{EndpointId, TaskId};
    use crate::impls::{HashTaskStore, InMemoryConnector, InMemoryStore};
    use crate::ports::QueueStore;

    /// task_id が "bad" で始まるものだけ失敗させる
    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, String> {
            if task.task_id.as_str().starts_with("bad") {
                Err(format!("refusing {}", task.task_id))
            } else {
                Ok(json!({ "echo": task.task_id.as_str() }))
            }
        }
    }

    fn queue(connector: &InMemoryConnector) -> EndpointQueue<InMemoryConnector> {
        EndpointQueue::new(
            EndpointId::new("ep-a"),
            ConnectionInfo::new("localhost"),
            connector.clone(),
        )
    }

    async fn submit(connector: &InMemoryConnector, id: &str) {
        let mut producer = queue(connector);
        producer.connect().await.unwrap();
        let mut task = Task::new(TaskId::new(id));
        producer.task_store().unwrap().create(&task).await.unwrap();
        producer.enqueue(&mut task).await.unwrap();
    }

    async fn wait_for_terminal(store: &InMemoryStore, id: &str) -> Task {
        let tasks = HashTaskStore::new(store.clone());
        for _ in 0..100 {
            if let Some(task) = tasks.from_id(&TaskId::new(id)).await.unwrap()
                && task.status.is_terminal()
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test]
    async fn workers_drive_tasks_to_terminal_states() {
        let connector = InMemoryConnector::new();
        let group = WorkerGroup::spawn(
            vec![queue(&connector), queue(&connector)],
            Arc::new(EchoHandler),
            Duration::from_millis(100),
        );
        assert_eq!(group.len(), 2);

        submit(&connector, "good-1").await;
        submit(&connector, "bad-1").await;

        let raw = connector.inspect();
        let good = wait_for_terminal(&raw, "good-1").await;
        assert_eq!(good.status, TaskState::Success);
        assert_eq!(good.endpoint, Some(EndpointId::new("ep-a")));
        assert_eq!(
            raw.hget("task_good-1", RESULT_KIND).await.unwrap().as_deref(),
            Some(r#"{"echo":"good-1"}"#)
        );

        let bad = wait_for_terminal(&raw, "bad-1").await;
        assert_eq!(bad.status, TaskState::Failed);
        assert_eq!(
            raw.hget("task_bad-1", EXCEPTION_KIND).await.unwrap().as_deref(),
            Some(r#"{"error":"refusing bad-1"}"#)
        );

        group.shutdown_and_join().await;
        // 各ワーカー 1 本ずつ + submit 2 回
        assert_eq!(connector.connect_count(), 4);
    }

    #[tokio::test]
    async fn shutdown_waits_at_most_one_poll() {
        let connector = InMemoryConnector::new();
        let group = WorkerGroup::spawn(
            vec![queue(&connector)],
            Arc::new(EchoHandler),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let start = std::time::Instant::now();
        group.shutdown_and_join().await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn worker_recovers_from_dropped_connection() {
        let connector = InMemoryConnector::new();
        let group = WorkerGroup::spawn(
            vec![queue(&connector)],
            Arc::new(EchoHandler),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        connector.drop_connections();

        submit(&connector, "after-drop").await;
        let task = wait_for_terminal(&connector.inspect(), "after-drop").await;
        assert_eq!(task.status, TaskState::Success);

        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn zero_poll_timeout_still_shuts_down() {
        let connector = InMemoryConnector::new();
        let group = WorkerGroup::spawn(
            vec![queue(&connector)],
            Arc::new(EchoHandler),
            Duration::ZERO,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(3), group.shutdown_and_join())
            .await
            .expect("workers should stop within one clamped poll");
    }

    #[tokio::test]
    async fn failing_dequeue_is_throttled() {
        let connector = InMemoryConnector::new();
        // list のはずの key に hash が入っている（毎回 WRONGTYPE になる）
        connector
            .inspect()
            .hset("task_ep-a_list", "oops", "1")
            .await
            .unwrap();

        let group = WorkerGroup::spawn(
            vec![queue(&connector)],
            Arc::new(EchoHandler),
            Duration::from_millis(100),
        );
        tokio::time::sleep(Duration::from_millis(350)).await;
        group.shutdown_and_join().await;

        // 100ms ごとに 1 回程度。空回りしていれば桁違いに多くなる
        let attempts = connector.blpop_count();
        assert!(attempts >= 1, "worker never polled");
        assert!(attempts <= 6, "worker spun {attempts} times");
    }
}
