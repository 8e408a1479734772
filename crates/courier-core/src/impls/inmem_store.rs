//! InMemoryStore - 開発用・テスト用の list / hash ストア
//!
//! # 実装メモ
//! - Mutex + Condvar による blocking pop（spawn_blocking 上で待つ）
//! - list と hash を 1 つの Mutex で管理するので、`hset_then_rpush` は自然に原子的
//! - Connector は接続回数を数え、到達不能・切断を再現できる

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::ConnectionInfo;
use crate::error::StoreError;
use crate::ports::{Connector, QueueStore};

#[derive(Debug, Default)]
struct Data {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default)]
struct Shared {
    data: Mutex<Data>,
    /// push 時の通知用
    condvar: Condvar,
    /// blpop の呼び出し回数（テストでの空回り検出用）
    blpops: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Data> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// InMemoryStore は 1 本の「接続」を表すハンドル
///
/// clone したハンドルは同じ接続を共有する。データ自体は同じ Connector から
/// 払い出された全ハンドルで共有される。
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    /// false になったら接続断として扱う
    alive: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::attach(Arc::new(Shared::default()))
    }

    fn attach(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// この接続を切断する。待機中の blpop も起こしてエラーにする
    pub fn drop_connection(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // 待機中のスレッドがどの key を待っていても起こす
        let _guard = self.shared.lock();
        self.shared.condvar.notify_all();
    }

    fn check_alive(&self) -> Result<(), StoreError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("connection closed".to_string()))
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Data>, StoreError> {
        self.check_alive()?;
        Ok(self.shared.lock())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

fn push_back(data: &mut Data, key: &str, value: &str) -> Result<usize, StoreError> {
    if data.hashes.contains_key(key) {
        return Err(wrong_type(key));
    }
    let list = data.lists.entry(key.to_string()).or_default();
    list.push_back(value.to_string());
    Ok(list.len())
}

fn set_fields(data: &mut Data, key: &str, fields: &[(&str, &str)]) -> Result<(), StoreError> {
    if data.lists.contains_key(key) {
        return Err(wrong_type(key));
    }
    let hash = data.hashes.entry(key.to_string()).or_default();
    for (field, value) in fields {
        hash.insert(field.to_string(), value.to_string());
    }
    Ok(())
}

fn pop_front(data: &mut Data, key: &str) -> Option<String> {
    let list = data.lists.get_mut(key)?;
    let value = list.pop_front();
    // Redis と同じく、空になった list は消える
    if list.is_empty() {
        data.lists.remove(key);
    }
    value
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn blpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        self.shared.blpops.fetch_add(1, Ordering::SeqCst);
        let store = self.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let mut guard = store.lock()?;
            loop {
                if guard.hashes.contains_key(&key) {
                    return Err(wrong_type(&key));
                }
                if let Some(value) = pop_front(&mut guard, &key) {
                    return Ok(Some((key, value)));
                }

                if timeout.is_zero() {
                    guard = store
                        .shared
                        .condvar
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                } else {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Ok(None);
                    }
                    let remaining = timeout.saturating_sub(elapsed);
                    let (new_guard, _) = store
                        .shared
                        .condvar
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = new_guard;
                }
                store.check_alive()?;
            }
        })
        .await
        .map_err(|e| StoreError::Command(format!("blpop failed: {e}")))?
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut guard = self.lock()?;
        let len = push_back(&mut guard, key, value)?;
        self.shared.condvar.notify_all();
        Ok(len)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        set_fields(&mut guard, key, &[(field, value)])
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let guard = self.lock()?;
        if guard.lists.contains_key(key) {
            return Err(wrong_type(key));
        }
        Ok(guard
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hset_then_rpush(
        &self,
        hash_key: &str,
        fields: &[(&str, &str)],
        list_key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        // 型チェックを先に済ませ、途中で失敗して片方だけ書かれることを避ける
        if guard.lists.contains_key(hash_key) {
            return Err(wrong_type(hash_key));
        }
        if guard.hashes.contains_key(list_key) {
            return Err(wrong_type(list_key));
        }
        set_fields(&mut guard, hash_key, fields)?;
        push_back(&mut guard, list_key, value)?;
        self.shared.condvar.notify_all();
        Ok(())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let guard = self.lock()?;
        Ok(guard.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        let Some(list) = guard.lists.get(key) else {
            return Ok(Vec::new());
        };

        let len = list.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }
}

/// InMemoryConnector は InMemoryStore のハンドルを払い出す
///
/// 接続のたびに新しいハンドル（新しい「接続」）を作るが、データは共有する。
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    shared: Arc<Shared>,
    connects: Arc<AtomicUsize>,
    unreachable: Arc<AtomicBool>,
    /// 払い出した接続の alive フラグ。ハンドルが全て drop されたものは connect 時に捨てる
    issued: Arc<Mutex<Vec<Weak<AtomicBool>>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでに確立した接続の数
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// false にすると以降の connect が失敗する
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// 払い出した全接続を切断する
    pub fn drop_connections(&self) {
        let issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        for alive in issued.iter().filter_map(Weak::upgrade) {
            alive.store(false, Ordering::SeqCst);
        }
        // 待機中の blpop を起こしてエラーにする
        let _guard = self.shared.lock();
        self.shared.condvar.notify_all();
    }

    /// blpop が呼ばれた回数（全接続の合計）
    pub fn blpop_count(&self) -> usize {
        self.shared.blpops.load(Ordering::SeqCst)
    }

    /// 接続を数えずにデータを覗くためのハンドル（テスト用）
    pub fn inspect(&self) -> InMemoryStore {
        InMemoryStore::attach(Arc::clone(&self.shared))
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Store = InMemoryStore;

    async fn connect(&self, info: &ConnectionInfo) -> Result<InMemoryStore, StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(format!(
                "connection refused: {info}"
            )));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let store = InMemoryStore::attach(Arc::clone(&self.shared));
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        issued.retain(|alive| alive.strong_count() > 0);
        issued.push(Arc::downgrade(&store.alive));
        Ok(store)
    }
}
