//! RedisStore - 本番用の list / hash ストア
//!
//! 1 つの multiplexed async connection を持つ。ハンドルの clone は同じ接続を共有する。
//! 自動再接続はしない（切断は `StoreError::Connection` として呼び出し側に返す）。

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::config::ConnectionInfo;
use crate::error::StoreError;
use crate::ports::{Connector, QueueStore};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_io_error()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn blpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(popped)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn hset_then_rpush(
        &self,
        hash_key: &str,
        fields: &[(&str, &str)],
        list_key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // MULTI/EXEC で HSET -> RPUSH の順に実行
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(hash_key, fields)
            .ignore()
            .rpush(list_key, value)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }
}

/// RedisConnector は `redis://host:port/` に接続する
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    type Store = RedisStore;

    async fn connect(&self, info: &ConnectionInfo) -> Result<RedisStore, StoreError> {
        let client = redis::Client::open(info.redis_url())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisStore::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        // port 1 には何も listen していない前提
        let info = ConnectionInfo::new("127.0.0.1").with_port(1);
        let err = RedisConnector.connect(&info).await.err().unwrap();
        assert!(err.is_connection(), "unexpected error: {err}");
    }

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn roundtrip_against_live_server() {
        let store = RedisConnector
            .connect(&ConnectionInfo::new("127.0.0.1"))
            .await
            .unwrap();
        let list = format!("courier_test_{}_list", ulid::Ulid::new());
        let hash = format!("task_{}", ulid::Ulid::new());

        store
            .hset_then_rpush(&hash, &[("args", "[1,2]")], &list, "t1")
            .await
            .unwrap();
        assert_eq!(store.lrange(&list, 0, -1).await.unwrap(), ["t1"]);

        let popped = store.blpop(&list, Duration::from_secs(1)).await.unwrap();
        assert_eq!(popped, Some((list.clone(), "t1".to_string())));
        assert_eq!(store.hget(&hash, "args").await.unwrap().as_deref(), Some("[1,2]"));

        let empty = store.blpop(&list, Duration::from_millis(200)).await.unwrap();
        assert_eq!(empty, None);
    }
}
