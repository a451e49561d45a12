//! 缓存快照：JSON 文件，内容以十六进制保存

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheError, CacheKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SnapshotEntry {
    pub key: CacheKey,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

const SNAPSHOT_VERSION: u32 = 1;

pub(crate) fn save(path: &Path, entries: &[SnapshotEntry]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        entries: entries.to_vec(),
    };
    // 先写临时文件再改名，避免半截快照
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_vec(&file)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn load(path: &Path) -> Result<Vec<SnapshotEntry>, CacheError> {
    let bytes = std::fs::read(path)?;
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    if file.version != SNAPSHOT_VERSION {
        return Err(CacheError::Snapshot(format!(
            "unsupported snapshot version {}",
            file.version
        )));
    }
    Ok(file.entries)
}
