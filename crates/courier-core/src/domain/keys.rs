//! Store key naming.
//!
//! 既存の producer / consumer と互換性を保つため、キー名はバイト単位で固定。
//! - `<prefix>_list`: pending task_id の FIFO list
//! - `task_<task_id>`: kind -> JSON payload の hash（task の status / endpoint も同居）

use super::{EndpointId, TaskId};

/// Hash field names used by the task record.
pub const STATUS_FIELD: &str = "status";
pub const ENDPOINT_FIELD: &str = "endpoint";
pub const CREATED_AT_FIELD: &str = "created_at";

pub fn list_key(prefix: &str) -> String {
    format!("{prefix}_list")
}

pub fn task_key(task_id: &TaskId) -> String {
    format!("task_{task_id}")
}

pub fn endpoint_prefix(endpoint: &EndpointId) -> String {
    format!("task_{endpoint}")
}
