//! Domain model (IDs, task state, task entity, store key layout).

pub mod ids;
pub mod keys;
pub mod state;
pub mod task;

pub use self::ids::{EndpointId, TaskId};
pub use self::state::{TaskState, UnknownTaskState};
pub use self::task::Task;
