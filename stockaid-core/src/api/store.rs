//! Parquet-backed persistent cache.
//!
//! Layout: `{root}/{provider}/{name}/{digest}.parquet` plus a sidecar
//! `{digest}.json` holding the full key, fetch time, TTL and a BLAKE3 hash of
//! the Parquet bytes.
//!
//! - Atomic writes (write to a unique .tmp, rename into place)
//! - Payload first, sidecar second; a reader only trusts a payload whose hash
//!   matches its sidecar, so a torn write reads as absent
//! - Corrupt entries are quarantined (`.quarantined`) and reported as absent
//! - TTL and fetch time are stored and returned verbatim; expiry is the
//!   caller's decision

use chrono::{DateTime, Utc};
use log::warn;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use super::key::CacheKey;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A cached API response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub payload: DataFrame,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.fetched_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Valid iff `now < fetched_at + ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Sidecar stored next to each payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: CacheKey,
    fetched_at: DateTime<Utc>,
    ttl_ms: u64,
    payload_hash: String,
    rows: usize,
}

/// One row of [`PersistentCache::status`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub rows: usize,
    pub bytes: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache encoding error: {0}")]
    Encode(String),

    #[error("cache directory not writable: {0}")]
    NotWritable(String),
}

/// The on-disk cache.
#[derive(Debug)]
pub struct PersistentCache {
    root: PathBuf,
    /// Per-key locks; readers and writers of one key take turns.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PersistentCache {
    /// Open (creating if needed) a cache rooted at `root`. Fails if the
    /// directory cannot be created or written.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let marker = root.join(format!(".writable-{}", std::process::id()));
        fs::write(&marker, b"ok")
            .map_err(|e| StoreError::NotWritable(format!("{}: {e}", root.display())))?;
        let _ = fs::remove_file(&marker);

        Ok(Self {
            root,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one provider/name namespace.
    fn namespace_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(path_segment(&key.provider))
            .join(path_segment(&key.name))
    }

    fn payload_path(&self, key: &CacheKey) -> PathBuf {
        self.namespace_dir(key)
            .join(format!("{}.parquet", key.digest()))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.namespace_dir(key).join(format!("{}.json", key.digest()))
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.digest()).or_default())
    }

    /// Load an entry. Absent, unreadable and corrupt entries all return `None`.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        // A reader must not see the sidecar and payload of different writes.
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let meta_path = self.meta_path(key);
        let payload_path = self.payload_path(key);

        let meta_json = match fs::read_to_string(&meta_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("cache read failed for {key}: {e}");
                return None;
            }
        };

        let meta: EntryMeta = match serde_json::from_str(&meta_json) {
            Ok(m) => m,
            Err(e) => {
                quarantine(&meta_path, &format!("unparseable sidecar: {e}"));
                quarantine(&payload_path, "orphaned by corrupt sidecar");
                return None;
            }
        };

        if &meta.key != key {
            warn!("cache digest collision for {key}; treating as absent");
            return None;
        }

        let bytes = match fs::read(&payload_path) {
            Ok(b) => b,
            Err(e) => {
                warn!("cache payload missing for {key}: {e}");
                return None;
            }
        };

        if blake3::hash(&bytes).to_hex().as_str() != meta.payload_hash {
            quarantine(&payload_path, "payload hash mismatch");
            quarantine(&meta_path, "payload hash mismatch");
            return None;
        }

        let payload = match ParquetReader::new(Cursor::new(bytes)).finish() {
            Ok(df) => df,
            Err(e) => {
                quarantine(&payload_path, &format!("unreadable parquet: {e}"));
                quarantine(&meta_path, "unreadable parquet");
                return None;
            }
        };

        Some(CacheEntry {
            key: meta.key,
            fetched_at: meta.fetched_at,
            ttl: Duration::from_millis(meta.ttl_ms),
            payload,
        })
    }

    /// Store an entry, replacing any previous one for the same key.
    pub fn put(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let lock = self.key_lock(&entry.key);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(self.namespace_dir(&entry.key))?;

        let mut bytes = Vec::new();
        ParquetWriter::new(&mut bytes)
            .finish(&mut entry.payload.clone())
            .map_err(|e| StoreError::Encode(format!("write parquet: {e}")))?;

        let meta = EntryMeta {
            key: entry.key.clone(),
            fetched_at: entry.fetched_at,
            ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
            payload_hash: blake3::hash(&bytes).to_hex().to_string(),
            rows: entry.payload.height(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| StoreError::Encode(format!("sidecar: {e}")))?;

        write_atomic(&self.payload_path(&entry.key), &bytes)?;
        write_atomic(&self.meta_path(&entry.key), &meta_json)?;
        Ok(())
    }

    /// Remove an entry if present.
    pub fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        for path in [self.payload_path(key), self.meta_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// List every readable entry, sorted by provider, name, then fetch time.
    pub fn status(&self) -> Result<Vec<EntryStatus>, StoreError> {
        let mut rows = Vec::new();
        for provider in read_dirs(&self.root)? {
            for namespace in read_dirs(&provider)? {
                for file in fs::read_dir(&namespace)? {
                    let path = file?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Ok(content) = fs::read_to_string(&path) else {
                        continue;
                    };
                    let Ok(meta) = serde_json::from_str::<EntryMeta>(&content) else {
                        continue;
                    };
                    let bytes = fs::metadata(path.with_extension("parquet"))
                        .map(|m| m.len())
                        .unwrap_or(0);
                    rows.push(EntryStatus {
                        key: meta.key,
                        fetched_at: meta.fetched_at,
                        ttl: Duration::from_millis(meta.ttl_ms),
                        rows: meta.rows,
                        bytes,
                    });
                }
            }
        }
        rows.sort_by(|a, b| {
            (&a.key.provider, &a.key.name, a.fetched_at)
                .cmp(&(&b.key.provider, &b.key.name, b.fetched_at))
        });
        Ok(rows)
    }

    /// Delete every entry and return how many there were. The root
    /// directory itself is kept.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for provider in read_dirs(&self.root)? {
            for namespace in read_dirs(&provider)? {
                removed += fs::read_dir(&namespace)?
                    .filter_map(Result::ok)
                    .filter(|f| f.path().extension().and_then(|e| e.to_str()) == Some("json"))
                    .count();
            }
            fs::remove_dir_all(&provider)?;
        }
        Ok(removed)
    }
}

/// Write bytes to `path` atomically via a uniquely-named temp file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("entry");
    let tmp_path = path.with_file_name(format!("{file_name}.{}-{n}.tmp", std::process::id()));

    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Io(e)
    })
}

/// Move a corrupt file aside so it is not read again.
fn quarantine(path: &Path, reason: &str) {
    if !path.exists() {
        return;
    }
    let mut target = path.as_os_str().to_owned();
    target.push(".quarantined");
    warn!("quarantining corrupt cache file {}: {reason}", path.display());
    let _ = fs::rename(path, PathBuf::from(target));
}

fn read_dirs(path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

/// Make a provider or API name safe to use as a directory name.
fn path_segment(name: &str) -> String {
    let safe = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if safe {
        name.to_string()
    } else {
        let digest = blake3::hash(name.as_bytes()).to_hex();
        format!("x-{}", &digest.as_str()[..16])
    }
}
