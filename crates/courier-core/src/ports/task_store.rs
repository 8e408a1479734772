//! TaskStore port - Task レコードの正本（source of truth）
//!
//! Task の作成や状態遷移は本来 queue の外側（Web サービス側）の責務。
//! queue は dequeue 時に `from_id` で Task を復元するためだけにこれを使う。

use async_trait::async_trait;

use crate::domain::{Task, TaskId, TaskState};
use crate::error::StoreError;

/// TaskStore は Task レコードの読み書き
///
/// # 設計原則
/// - レコードは `task_<task_id>` hash に保存（payload の kind と同居）
/// - `status` / `endpoint` は JSON ではなく素の文字列
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// レコードを作成（status, endpoint, created_at）
    async fn create(&self, task: &Task) -> Result<(), StoreError>;

    /// id から Task を復元。レコードがなければ `Ok(None)`
    async fn from_id(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// status を更新し、`task` にも反映する
    async fn set_status(&self, task: &mut Task, status: TaskState) -> Result<(), StoreError>;

    /// kind の payload を上書きする（list には触れない）
    async fn set_payload(
        &self,
        task_id: &TaskId,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError>;
}
