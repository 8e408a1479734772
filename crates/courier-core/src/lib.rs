//! courier-core
//!
//! Task-dispatch queue on top of a list / hash store (Redis).
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, keys）
//! - **ports**: 抽象化レイヤー（QueueStore, Connector, TaskStore）
//! - **impls**: 実装（RedisStore, InMemoryStore, HashTaskStore）
//! - **queue**: QueueClient（汎用）と EndpointQueue（endpoint 専用）
//! - **worker**: EndpointQueue を回すワーカーグループ
//! - **config**: 接続設定
//! - **error**: エラー型
//!
//! # 使用例
//! ```ignore
//! let mut queue = EndpointQueue::redis(EndpointId::new("ep-a"), ConnectionInfo::new("localhost"));
//! queue.connect().await?;
//! queue.enqueue(&mut task).await?;
//!
//! loop {
//!     // タイムアウトは None。エラーではないのでそのまま再試行する
//!     let Some(task) = queue.dequeue(Duration::from_secs(1)).await? else { continue };
//!     // ...
//! }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod worker;

pub use config::{ConnectionInfo, QueueConfig};
pub use domain::{EndpointId, Task, TaskId, TaskState};
pub use error::{QueueError, StoreError};
pub use queue::{EndpointQueue, QueueClient};
pub use worker::{TaskHandler, WorkerGroup};
