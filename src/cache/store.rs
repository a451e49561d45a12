//! 内容寻址缓存：容量上限、LRU 淘汰、TTL 过期
//!
//! - 读并发：读锁下查找，最近访问时间用原子计数记录，不阻塞其它读者
//! - 写串行：单把写锁；同一键在 TTL 内先写者胜，内容相同的重复写入只刷新最近访问
//! - 锁中毒视为缓存不可用：get 返回 None、put 返回 Unavailable，调用方按未命中继续

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::snapshot::{self, SnapshotEntry};
use crate::cache::{CacheError, CacheKey, CacheStats};

/// 缓存配置
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 占用字节上限
    pub max_bytes: u64,
    /// put 未指定 TTL 时使用
    pub default_ttl: Duration,
    /// 后台清理周期
    pub sweep_interval: Duration,
    /// 关闭时写出、启动时载入的快照文件
    pub snapshot_path: Option<std::path::PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024 * 1024,
            default_ttl: Duration::from_secs(6 * 3600),
            sweep_interval: Duration::from_secs(300),
            snapshot_path: None,
        }
    }
}

/// 对外暴露的条目元信息（不含内容）
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// put 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// 内容相同，仅刷新最近访问
    Refreshed,
    /// 同键已有不同内容且未过期，保留先写入者
    Kept,
    /// 单条超过容量上限
    Rejected,
    /// 缓存不可用（锁中毒）
    Unavailable,
}

struct Slot {
    value: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_access: AtomicU64,
}

impl Slot {
    fn size(&self) -> u64 {
        self.value.len() as u64
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Slot>,
    occupied: u64,
}

impl Inner {
    fn remove(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.occupied -= slot.size();
        Some(slot)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn least_recent(&self) -> Option<CacheKey> {
        self.entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone())
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// 跨规划共享的检索结果缓存
pub struct ContentCache {
    config: CacheConfig,
    inner: RwLock<Inner>,
    clock: AtomicU64,
    counters: Counters,
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// 创建并尝试载入快照；快照损坏时记录警告并从空缓存开始
    pub fn open(config: CacheConfig) -> Self {
        let cache = Self::new(config);
        if let Some(path) = cache.config.snapshot_path.clone() {
            match snapshot::load(&path) {
                Ok(entries) => {
                    let restored = cache.restore(entries);
                    tracing::info!(path = %path.display(), restored, "cache snapshot loaded");
                }
                Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cache snapshot unreadable, starting empty");
                }
            }
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn read(&self) -> Option<RwLockReadGuard<'_, Inner>> {
        match self.inner.read() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("cache lock poisoned, treating as miss");
                None
            }
        }
    }

    fn write(&self) -> Option<RwLockWriteGuard<'_, Inner>> {
        match self.inner.write() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("cache lock poisoned, skipping write");
                None
            }
        }
    }

    /// 读取；未命中或已过期返回 None，从不触发抓取
    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let now = Utc::now();
        let expired = {
            let Some(inner) = self.read() else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            match inner.entries.get(key) {
                Some(slot) if !slot.is_expired(now) => {
                    slot.last_access.store(self.tick(), Ordering::Relaxed);
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(slot.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Some(mut inner) = self.write() {
                let still_expired = inner
                    .entries
                    .get(key)
                    .map(|slot| slot.is_expired(now))
                    .unwrap_or(false);
                if still_expired {
                    inner.remove(key);
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写入；ttl 为 None 时使用默认 TTL
    pub fn put(&self, key: CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> PutOutcome {
        let size = value.len() as u64;
        if size > self.config.max_bytes {
            tracing::debug!(key = %key, size, "cache entry larger than ceiling, rejected");
            return PutOutcome::Rejected;
        }
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let Some(mut inner) = self.write() else {
            return PutOutcome::Unavailable;
        };

        let mut stale = false;
        if let Some(existing) = inner.entries.get(&key) {
            if existing.is_expired(now) {
                stale = true;
            } else {
                existing.last_access.store(self.tick(), Ordering::Relaxed);
                return if existing.value == value {
                    PutOutcome::Refreshed
                } else {
                    PutOutcome::Kept
                };
            }
        }
        if stale {
            inner.remove(&key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.make_room(&mut inner, size, now);
        inner.occupied += size;
        inner.entries.insert(
            key,
            Slot {
                value,
                created_at: now,
                expires_at,
                last_access: AtomicU64::new(self.tick()),
            },
        );
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        PutOutcome::Inserted
    }

    /// 先清过期，再按 LRU 淘汰，直到能容纳 incoming 字节
    fn make_room(&self, inner: &mut Inner, incoming: u64, now: DateTime<Utc>) {
        if inner.occupied + incoming <= self.config.max_bytes {
            return;
        }
        let expired = inner.purge_expired(now);
        self.counters
            .expirations
            .fetch_add(expired as u64, Ordering::Relaxed);
        while inner.occupied + incoming > self.config.max_bytes {
            let Some(victim) = inner.least_recent() else {
                break;
            };
            if let Some(slot) = inner.remove(&victim) {
                tracing::debug!(key = %victim, size = slot.size(), "cache evict (lru)");
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// 清理过期条目，并在超出上限时按 LRU 淘汰；返回移除条数
    pub fn evict_if_needed(&self) -> usize {
        let Some(mut inner) = self.write() else {
            return 0;
        };
        let before = inner.entries.len();
        self.make_room(&mut inner, 0, Utc::now());
        before - inner.entries.len()
    }

    /// 仅清理过期条目
    pub fn sweep_expired(&self) -> usize {
        let Some(mut inner) = self.write() else {
            return 0;
        };
        let purged = inner.purge_expired(Utc::now());
        self.counters
            .expirations
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// 后台周期清理，token 取消后退出
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.config.sweep_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let purged = cache.sweep_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "cache sweep");
                        }
                    }
                }
            }
        })
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let inner = self.read()?;
        inner.entries.get(key).map(|slot| CacheEntry {
            key: key.clone(),
            size: slot.size(),
            created_at: slot.created_at,
            expires_at: slot.expires_at,
        })
    }

    pub fn len(&self) -> usize {
        self.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.read().map(|i| i.occupied).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, occupied) = self
            .read()
            .map(|i| (i.entries.len(), i.occupied))
            .unwrap_or((0, 0));
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries,
            occupied_bytes: occupied,
            max_bytes: self.config.max_bytes,
        }
    }

    /// 清空全部条目
    pub fn flush(&self) {
        if let Some(mut inner) = self.write() {
            inner.entries.clear();
            inner.occupied = 0;
        }
    }

    /// 关闭：配置了快照路径则写出未过期条目，然后清空
    pub fn close(&self) -> Result<(), CacheError> {
        if let Some(path) = &self.config.snapshot_path {
            let entries = self.export();
            let count = entries.len();
            snapshot::save(path, &entries)?;
            tracing::info!(path = %path.display(), count, "cache snapshot written");
        }
        self.flush();
        Ok(())
    }

    /// 按最近访问从旧到新导出未过期条目
    fn export(&self) -> Vec<SnapshotEntry> {
        let now = Utc::now();
        let Some(inner) = self.read() else {
            return Vec::new();
        };
        let mut live: Vec<(&CacheKey, &Slot)> = inner
            .entries
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .collect();
        live.sort_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed));
        live.into_iter()
            .map(|(key, slot)| SnapshotEntry {
                key: key.clone(),
                value: hex::encode(&slot.value),
                created_at: slot.created_at,
                expires_at: slot.expires_at,
            })
            .collect()
    }

    fn restore(&self, entries: Vec<SnapshotEntry>) -> usize {
        let now = Utc::now();
        let Some(mut inner) = self.write() else {
            return 0;
        };
        let mut restored = 0;
        for entry in entries {
            if now >= entry.expires_at {
                continue;
            }
            let Some(key) = CacheKey::from_hex(entry.key.as_str()) else {
                tracing::warn!(key = %entry.key, "skipping snapshot entry with malformed key");
                continue;
            };
            let Ok(value) = hex::decode(&entry.value) else {
                tracing::warn!(key = %key, "skipping undecodable snapshot entry");
                continue;
            };
            let size = value.len() as u64;
            if size > self.config.max_bytes || inner.entries.contains_key(&key) {
                continue;
            }
            self.make_room(&mut inner, size, now);
            inner.occupied += size;
            inner.entries.insert(
                key,
                Slot {
                    value,
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    last_access: AtomicU64::new(self.tick()),
                },
            );
            restored += 1;
        }
        restored
    }
}
