use super::{EndpointId, TaskId, TaskState};

/// Task エンティティ（正本はストア側の `task_<task_id>` hash）
///
/// queue はこれを id で参照するだけで、enqueue 時に `status` / `endpoint` を書き換える。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskState,
    pub endpoint: Option<EndpointId>,
}

impl Task {
    /// 新規タスク（status = Created, endpoint 未割当）
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskState::Created,
            endpoint: None,
        }
    }

    pub fn generate() -> Self {
        Self::new(TaskId::generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_as_created() {
        let task = Task::new(TaskId::new("t1"));
        assert_eq!(task.status, TaskState::Created);
        assert_eq!(task.endpoint, None);
    }
}
