//! State - タスクの状態

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// TaskState はタスクの状態を表現
///
/// # 状態遷移
/// - Created -> WaitingForEp（enqueue 時、queue が行う唯一の遷移）
/// - WaitingForEp -> Running -> Success / Failed（dequeue 後に worker が進める）
///
/// ストア上では `"waiting-for-ep"` のような素の文字列で保存する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Created,
    WaitingForEp,
    Running,
    Success,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::WaitingForEp => "waiting-for-ep",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task state: {0}")]
pub struct UnknownTaskState(pub String);

impl FromStr for TaskState {
    type Err = UnknownTaskState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskState::Created),
            "waiting-for-ep" => Ok(TaskState::WaitingForEp),
            "running" => Ok(TaskState::Running),
            "success" => Ok(TaskState::Success),
            "failed" => Ok(TaskState::Failed),
            other => Err(UnknownTaskState(other.to_string())),
        }
    }
}
