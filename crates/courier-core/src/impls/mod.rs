//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **RedisStore / RedisConnector**: 本番用の list / hash ストア
//! - **InMemoryStore / InMemoryConnector**: 開発用・テスト用
//! - **HashTaskStore**: `task_<task_id>` hash 上の TaskStore

pub mod hash_task_store;
pub mod inmem_store;
pub mod redis_store;

pub use self::hash_task_store::HashTaskStore;
pub use self::inmem_store::{InMemoryConnector, InMemoryStore};
pub use self::redis_store::{RedisConnector, RedisStore};
