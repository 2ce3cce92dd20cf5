//! Content hash ledger: which song first produced a given clip hash.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub song_id: i64,
    pub song_name: String,
    pub filename: String,
    /// RFC 3339 time the hash was first recorded.
    pub timestamp: String,
}

impl LedgerEntry {
    pub fn new(song_id: i64, song_name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            song_id,
            song_name: song_name.into(),
            filename: filename.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Result of recording a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInsert {
    /// First time this hash was seen.
    Inserted,
    /// The hash is already recorded for the same song.
    AlreadyOwned,
    /// The hash belongs to another song; the existing entry is kept.
    Collision(LedgerEntry),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger file {path:?} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("timed out waiting for ledger lock {0:?}")]
    LockTimeout(PathBuf),
}

/// Key-value store of content hashes.
///
/// Entries are append-only: `record` never overwrites an existing hash.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn lookup(&self, hash: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    async fn record(&self, hash: &str, entry: LedgerEntry) -> Result<LedgerInsert, LedgerError>;
}

/// Compare a new entry with what the ledger already holds for its hash.
pub fn classify_insert(existing: Option<&LedgerEntry>, entry: &LedgerEntry) -> LedgerInsert {
    match existing {
        None => LedgerInsert::Inserted,
        Some(e) if e.song_id == entry.song_id => LedgerInsert::AlreadyOwned,
        Some(e) => LedgerInsert::Collision(e.clone()),
    }
}

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Ledger stored as one JSON object in a file.
///
/// Every read-modify-write holds an in-process mutex plus an exclusive
/// `<ledger>.lock` file so that concurrent runs do not lose each other's
/// entries. The file is replaced atomically via a temp file and rename.
pub struct JsonFileLedger {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
    lock_timeout: Duration,
    stale_lock_after: Duration,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sibling_with_suffix(&path, ".lock");
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
            lock_timeout: Duration::from_secs(10),
            stale_lock_after: Duration::from_secs(60),
        }
    }

    pub fn with_lock_timeouts(mut self, lock_timeout: Duration, stale_lock_after: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self.stale_lock_after = stale_lock_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of recorded hashes.
    pub async fn len(&self) -> Result<usize, LedgerError> {
        let _guard = self.guard.lock().await;
        Ok(self.read_all().await?.len())
    }

    async fn read_all(&self) -> Result<BTreeMap<String, LedgerEntry>, LedgerError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| LedgerError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    async fn write_all(&self, entries: &BTreeMap<String, LedgerEntry>) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(entries).map_err(|e| LedgerError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let tmp = sibling_with_suffix(&self.path, ".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn acquire_file_lock(&self) -> Result<LockFile, LedgerError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
                .await
            {
                Ok(_) => {
                    return Ok(LockFile {
                        path: self.lock_path.clone(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.lock_is_stale().await {
                        warn!(lock = ?self.lock_path, "Removing stale ledger lock");
                        let _ = tokio::fs::remove_file(&self.lock_path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(LedgerError::LockTimeout(self.lock_path.clone()));
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn lock_is_stale(&self) -> bool {
        let Ok(meta) = tokio::fs::metadata(&self.lock_path).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .map(|age| age > self.stale_lock_after)
            .unwrap_or(false)
    }
}

#[async_trait]
impl LedgerStore for JsonFileLedger {
    async fn lookup(&self, hash: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let _guard = self.guard.lock().await;
        Ok(self.read_all().await?.remove(hash))
    }

    async fn record(&self, hash: &str, entry: LedgerEntry) -> Result<LedgerInsert, LedgerError> {
        let _guard = self.guard.lock().await;
        let _lock = self.acquire_file_lock().await?;

        let mut entries = self.read_all().await?;
        let outcome = classify_insert(entries.get(hash), &entry);
        if outcome == LedgerInsert::Inserted {
            entries.insert(hash.to_string(), entry);
            self.write_all(&entries).await?;
            debug!(hash, total = entries.len(), "Recorded content hash");
        }
        Ok(outcome)
    }
}

/// Removes the lock file when dropped.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
