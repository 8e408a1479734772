//! QueueClient - namespace 付きの汎用キュークライアント
//!
//! `<prefix>_list` に task_id を流し、payload は `task_<task_id>` hash の `kind` フィールドに置く。
//! Task の意味論（状態遷移など）には関知しない。

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, trace};

use crate::config::ConnectionInfo;
use crate::domain::{TaskId, keys};
use crate::error::{QueueError, StoreError};
use crate::impls::RedisConnector;
use crate::ports::{Connector, QueueStore};

/// A namespaced queue over a list / hash store.
///
/// 接続は `connect()` を呼ぶまで張らない（プロセスをまたいで渡せるように）。
/// 接続ハンドルはこのインスタンスが所有し、`connect()` は何度呼んでも 1 本しか張らない。
pub struct QueueClient<C: Connector> {
    info: ConnectionInfo,
    prefix: String,
    connector: C,
    store: Option<C::Store>,
}

impl QueueClient<RedisConnector> {
    pub fn redis(prefix: impl Into<String>, info: ConnectionInfo) -> Self {
        Self::new(prefix, info, RedisConnector)
    }
}

impl<C: Connector> QueueClient<C> {
    pub fn new(prefix: impl Into<String>, info: ConnectionInfo, connector: C) -> Self {
        Self {
            info,
            prefix: prefix.into(),
            connector,
            store: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn list_key(&self) -> String {
        keys::list_key(&self.prefix)
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// 未接続なら接続する。接続済みなら何もしない
    pub async fn connect(&mut self) -> Result<(), QueueError> {
        if self.store.is_some() {
            return Ok(());
        }
        let connected = self.connector.connect(&self.info).await;
        match connected {
            Ok(store) => {
                debug!(
                    host = %self.info.host,
                    port = self.info.port,
                    queue = %self.prefix,
                    "connected"
                );
                self.store = Some(store);
                Ok(())
            }
            Err(err) => Err(self.lift(err)),
        }
    }

    /// 今の接続を捨てて張り直す（接続断からの復帰用）
    pub async fn reconnect(&mut self) -> Result<(), QueueError> {
        self.store = None;
        self.connect().await
    }

    pub(crate) fn store(&self) -> Result<&C::Store, QueueError> {
        self.store.as_ref().ok_or_else(|| QueueError::NotConnected {
            queue: self.to_string(),
        })
    }

    /// ストアのエラーを QueueError に変換する。接続エラーはここでログに残す
    pub(crate) fn lift(&self, err: StoreError) -> QueueError {
        if err.is_connection() {
            error!(
                host = %self.info.host,
                port = self.info.port,
                queue = %self.prefix,
                error = %err,
                "ConnectionError while talking to store"
            );
            QueueError::Connection {
                host: self.info.host.clone(),
                port: self.info.port,
                source: err,
            }
        } else {
            QueueError::Store(err)
        }
    }

    /// `<prefix>_list` から task_id を 1 件取り出す。タイムアウトなら `None`
    pub(crate) async fn pop_id(&self, timeout: Duration) -> Result<Option<TaskId>, QueueError> {
        let store = self.store()?;
        let list_key = self.list_key();
        match store.blpop(&list_key, timeout).await {
            // 1 つの list しか見ていないので list 名は捨てる
            Ok(Some((_, task_id))) => Ok(Some(TaskId::from(task_id))),
            Ok(None) => {
                trace!(queue = %list_key, ?timeout, "blocking pop timed out");
                Ok(None)
            }
            Err(err) => Err(self.lift(err)),
        }
    }

    /// `task_<task_id>` に fields を書いてから `<prefix>_list` に task_id を積む
    pub(crate) async fn push_with_fields(
        &self,
        task_id: &TaskId,
        fields: &[(&str, &str)],
    ) -> Result<(), QueueError> {
        let store = self.store()?;
        store
            .hset_then_rpush(
                &keys::task_key(task_id),
                fields,
                &self.list_key(),
                task_id.as_str(),
            )
            .await
            .map_err(|err| self.lift(err))
    }

    /// Blocking get.
    ///
    /// 最大 `timeout` 待って task_id を取り出し、その `kind` の payload を JSON デコードして返す。
    /// タイムアウトした場合は `Ok(None)`（呼び出し側はループで再試行する）。
    pub async fn get<T: DeserializeOwned>(
        &self,
        kind: &str,
        timeout: Duration,
    ) -> Result<Option<(TaskId, T)>, QueueError> {
        let Some(task_id) = self.pop_id(timeout).await? else {
            return Ok(None);
        };

        let raw = self
            .store()?
            .hget(&keys::task_key(&task_id), kind)
            .await
            .map_err(|err| self.lift(err))?
            .ok_or_else(|| QueueError::MissingPayload {
                task_id: task_id.clone(),
                kind: kind.to_string(),
            })?;

        let payload = serde_json::from_str(&raw).map_err(|source| QueueError::Decode {
            task_id: task_id.clone(),
            kind: kind.to_string(),
            source,
        })?;
        Ok(Some((task_id, payload)))
    }

    /// payload を `task_<task_id>` の `kind` に書き、task_id を `<prefix>_list` に積む
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        task_id: &TaskId,
        kind: &str,
        payload: &T,
    ) -> Result<(), QueueError> {
        // 未接続なら payload に関係なく NotConnected
        self.store()?;
        let encoded = serde_json::to_string(payload).map_err(|source| QueueError::Encode {
            kind: kind.to_string(),
            source,
        })?;

        self.push_with_fields(task_id, &[(kind, &encoded)]).await?;
        debug!(queue = %self.prefix, %task_id, kind, "put");
        Ok(())
    }

    /// 待機中の task_id の数
    pub async fn len(&self) -> Result<usize, QueueError> {
        self.store()?
            .llen(&self.list_key())
            .await
            .map_err(|err| self.lift(err))
    }

    /// 待機中の task_id（先頭から順に、取り出さない）
    pub async fn pending(&self) -> Result<Vec<TaskId>, QueueError> {
        let ids = self
            .store()?
            .lrange(&self.list_key(), 0, -1)
            .await
            .map_err(|err| self.lift(err))?;
        Ok(ids.into_iter().map(TaskId::from).collect())
    }
}

impl<C: Connector> fmt::Display for QueueClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<QueueClient at {}#{}>", self.info, self.prefix)
    }
}

impl<C: Connector> fmt::Debug for QueueClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("info", &self.info)
            .field("prefix", &self.prefix)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryConnector;
    use serde_json::{Value, json};
    use tokio::time::Instant;

    fn client(connector: &InMemoryConnector) -> QueueClient<InMemoryConnector> {
        QueueClient::new("task", ConnectionInfo::new("localhost"), connector.clone())
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        let payload = json!({"a": 1, "b": [2, 3], "c": {"d": null}});
        queue.put(&TaskId::new("01"), "args", &payload).await.unwrap();

        let (task_id, got) = queue
            .get::<Value>("args", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task_id, TaskId::new("01"));
        assert_eq!(got, payload);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_decodes_into_typed_payload() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Args {
            x: i64,
            name: String,
        }

        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        let args = Args {
            x: 7,
            name: "seven".to_string(),
        };
        queue.put(&TaskId::new("t1"), "args", &args).await.unwrap();

        let (_, got) = queue
            .get::<Args>("args", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, args);
    }

    #[tokio::test]
    async fn get_times_out_with_none() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        let start = Instant::now();
        let got = queue
            .get::<Value>("args", Duration::from_millis(300))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn operations_before_connect_fail() {
        let queue = client(&InMemoryConnector::new());

        let err = queue
            .get::<Value>("args", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::NotConnected { ref queue } if queue == "<QueueClient at localhost:6379#task>"
        ));

        let err = queue
            .put(&TaskId::new("t1"), "args", &json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotConnected { .. }));
        assert!(!queue.is_connected());
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        assert!(!queue.is_connected());

        queue.connect().await.unwrap();
        queue.connect().await.unwrap();

        assert!(queue.is_connected());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_is_a_connection_error() {
        let connector = InMemoryConnector::new();
        connector.set_reachable(false);
        let mut queue = client(&connector);

        let err = queue.connect().await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::Connection { ref host, port: 6379, .. } if host == "localhost"
        ));
        assert!(!queue.is_connected());

        // 呼び出し側の判断で再試行できる
        connector.set_reachable(true);
        queue.connect().await.unwrap();
        assert!(queue.is_connected());
    }

    #[tokio::test]
    async fn dropped_connection_surfaces_and_reconnect_recovers() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        connector.drop_connections();
        let err = queue
            .put(&TaskId::new("t1"), "args", &json!(1))
            .await
            .unwrap_err();
        assert!(err.is_connection());

        queue.reconnect().await.unwrap();
        queue.put(&TaskId::new("t1"), "args", &json!(1)).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_writes_payload_before_id_is_visible() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        queue.put(&TaskId::new("t1"), "function", &json!("f")).await.unwrap();

        let raw = connector.inspect();
        assert_eq!(raw.lrange("task_list", 0, -1).await.unwrap(), ["t1"]);
        assert_eq!(
            raw.hget("task_t1", "function").await.unwrap().as_deref(),
            Some("\"f\"")
        );
    }

    #[tokio::test]
    async fn missing_and_malformed_payloads() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        let raw = connector.inspect();
        raw.rpush("task_list", "t1").await.unwrap();
        let err = queue
            .get::<Value>("args", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::MissingPayload { ref kind, .. } if kind == "args"));

        raw.hset_then_rpush("task_t2", &[("args", "{not json")], "task_list", "t2")
            .await
            .unwrap();
        let err = queue
            .get::<Value>("args", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Decode { ref task_id, .. } if task_id.as_str() == "t2"));
    }

    #[tokio::test]
    async fn concurrent_kinds_do_not_clobber() {
        let connector = InMemoryConnector::new();
        let task_id = TaskId::new("shared");

        let mut producers = Vec::new();
        for kind in ["args", "function", "result"] {
            let connector = connector.clone();
            let task_id = task_id.clone();
            producers.push(tokio::spawn(async move {
                let mut queue = client(&connector);
                queue.connect().await.unwrap();
                queue.put(&task_id, kind, &json!({ "kind": kind })).await.unwrap();
            }));
        }
        for p in producers {
            p.await.unwrap();
        }

        let raw = connector.inspect();
        for kind in ["args", "function", "result"] {
            let stored = raw.hget("task_shared", kind).await.unwrap().unwrap();
            let value: Value = serde_json::from_str(&stored).unwrap();
            assert_eq!(value, json!({ "kind": kind }));
        }
    }

    #[tokio::test]
    async fn pending_is_fifo() {
        let connector = InMemoryConnector::new();
        let mut queue = client(&connector);
        queue.connect().await.unwrap();

        for id in ["1", "2", "3"] {
            queue.put(&TaskId::new(id), "args", &json!(null)).await.unwrap();
        }
        let pending: Vec<String> = queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(TaskId::into_string)
            .collect();
        assert_eq!(pending, ["1", "2", "3"]);
    }
}
