//! Domain identifiers (strongly-typed IDs).
//!
//! task_id / endpoint_id はどちらも外部から渡される不透明な文字列。
//! ストアのキー名にそのまま埋め込まれるため、Display は値をそのまま出す
//! （プレフィックスを付けない）。
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を持ちつつ、`T` はマーカー型としてだけ使う。
//! TaskId と EndpointId はどちらも中身が String だが、コンパイル時に混同できない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// ログやエラーメッセージで使う名前（例: "task", "endpoint"）
    fn name() -> &'static str;
}

/// ジェネリック ID 型
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// ULID で新しい ID を採番する
    pub fn generate() -> Self {
        Self::new(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

// derive だと T にも境界が付いてしまうので手書きする
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", T::name(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {}

impl IdMarker for Task {
    fn name() -> &'static str {
        "task"
    }
}

/// Endpoint のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {}

impl IdMarker for Endpoint {
    fn name() -> &'static str {
        "endpoint"
    }
}

/// Identifier of a Task (opaque, unique).
pub type TaskId = Id<Task>;

/// Identifier of an Endpoint (remote execution target).
pub type EndpointId = Id<Endpoint>;
