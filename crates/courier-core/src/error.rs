use thiserror::Error;

use crate::domain::TaskId;

/// ストア（Redis / InMemory）レベルのエラー
///
/// `Connection` は到達不能・切断・I/O 失敗、`Command` はコマンド自体の失敗
/// （型不一致、サーバ側エラーなど）。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Queue operations のエラー
///
/// タイムアウト（Empty）はエラーではなく `Ok(None)` で表現する。
#[derive(Debug, Error)]
pub enum QueueError {
    /// `connect()` 前に操作した
    #[error("Queue {queue} is not connected. Cannot execute queue operations")]
    NotConnected { queue: String },

    /// ストアに到達できない / 接続が切れた（生成時にログ済み）
    #[error("connection error while talking to store at {host}:{port}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),

    #[error("no payload of kind={kind} for task_id={task_id}")]
    MissingPayload { task_id: TaskId, kind: String },

    #[error("payload of kind={kind} for task_id={task_id} is not valid json")]
    Decode {
        task_id: TaskId,
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload of kind={kind} cannot be encoded as json")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

impl QueueError {
    /// 呼び出し側で再接続すべきエラーか
    pub fn is_connection(&self) -> bool {
        matches!(self, QueueError::Connection { .. })
    }
}
