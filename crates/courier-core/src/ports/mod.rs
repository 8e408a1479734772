//! Ports - 抽象化レイヤー
//!
//! 外部システム（Redis など）へのインターフェースを trait として定義し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - list は配送キュー（task_id のみ）
//! - hash は payload と Task レコードの保存先

pub mod queue_store;
pub mod task_store;

pub use self::queue_store::{Connector, QueueStore};
pub use self::task_store::TaskStore;
