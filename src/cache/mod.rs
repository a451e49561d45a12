//! 缓存层：内容寻址、容量受限的检索结果存储
//!
//! 与调用方解耦：只负责 get / put / 淘汰，未命中时立即返回，不会隐式抓取。

pub mod key;
pub(crate) mod snapshot;
pub mod store;

use thiserror::Error;

pub use key::CacheKey;
pub use store::{CacheConfig, CacheEntry, ContentCache, PutOutcome};

/// 快照读写错误（运行期读写不会返回错误，只会降级为未命中）
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache snapshot I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache snapshot format: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Cache snapshot: {0}")]
    Snapshot(String),
}

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub occupied_bytes: u64,
    pub max_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
