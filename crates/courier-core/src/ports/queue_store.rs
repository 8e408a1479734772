//! QueueStore port - list / hash ストア（Redis または InMemory）
//!
//! queue が必要とするコマンドだけを切り出したもの。
//! list には task_id のみを流し、payload は hash 側に置く。

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConnectionInfo;
use crate::error::StoreError;

/// QueueStore は list と hash の最小コマンドセット
///
/// # 設計原則
/// - 1 メソッド = 1 リモート呼び出し（または 1 パイプライン）
/// - blocking pop はタイムアウト付き。タイムアウトは `Ok(None)`
/// - ハンドルは Clone で安価に複製できる（同じ接続を共有する）
#[async_trait]
pub trait QueueStore: Clone + Send + Sync + 'static {
    /// `key` の先頭を取り出す。空なら最大 `timeout` 待つ。
    ///
    /// 戻り値は `(list 名, 要素)`。`timeout` が 0 の場合は無期限に待つ（BLPOP と同じ）。
    async fn blpop(&self, key: &str, timeout: Duration)
    -> Result<Option<(String, String)>, StoreError>;

    /// 末尾に追加し、追加後の長さを返す
    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// hash への書き込みと list への push を、この順序で 1 回の書き込みとして行う
    ///
    /// consumer が pop した時点で payload が読めることを保証するため、順序は入れ替えない。
    async fn hset_then_rpush(
        &self,
        hash_key: &str,
        fields: &[(&str, &str)],
        list_key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// `start..=stop`（負数は末尾から）の要素を取り出さずに返す
    async fn lrange(&self, key: &str, start: isize, stop: isize)
    -> Result<Vec<String>, StoreError>;
}

/// Connector はストアへの接続を確立する
///
/// 到達不能なら `StoreError::Connection` を返す。
#[async_trait]
pub trait Connector: Send + Sync {
    type Store: QueueStore;

    async fn connect(&self, info: &ConnectionInfo) -> Result<Self::Store, StoreError>;
}
