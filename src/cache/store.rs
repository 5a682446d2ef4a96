//! Content-addressed image store.
//!
//! One `<digest>.jpg` per key next to `index.json`. Every index
//! read-modify-persist cycle runs under a single async mutex; blob reads on
//! lookup happen outside it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::TimeDelta;
use metrics::counter;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::eviction::{EvictionPolicy, EvictionReport};
use super::index::{CacheEntry, CacheIndex, INDEX_FILE};
use super::key::CacheKey;
use crate::clock::Clock;
use crate::{Result, telemetry};

const BLOB_EXTENSION: &str = "jpg";
const TEMP_EXTENSION: &str = "tmp";

/// Entry count and size of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// On-disk image cache.
pub struct ImageCache {
    dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<CacheIndex>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl ImageCache {
    /// Open (creating if needed) the cache directory and load its index.
    ///
    /// Only failure to create the directory is an error; a corrupt index
    /// starts the cache empty.
    pub async fn open(dir: impl Into<PathBuf>, ttl: TimeDelta, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let index_path = CacheIndex::path_in(&dir);
        let index = CacheIndex::load(&index_path).await;
        debug!(dir = %dir.display(), entries = index.len(), "opened image cache");
        Ok(Self {
            dir,
            index_path,
            index: Mutex::new(index),
            ttl,
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Return the cached image for `key` if it is indexed, on disk and
    /// within the TTL.
    ///
    /// Expired entries are deleted on the way out. An indexed entry whose
    /// blob is gone is dropped from the index. Never fails: every problem
    /// reads as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let entry = {
            let mut index = self.index.lock().await;
            let entry = index.get(key)?.clone();
            if entry.is_expired(self.clock.now(), self.ttl) {
                debug!(key = %key, dish = %entry.dish_name_snippet, "cache entry expired");
                index.remove(key);
                self.remove_blob(key).await;
                self.persist(&index).await;
                counter!(telemetry::EVICTED_TOTAL, "pass" => "ttl").increment(1);
                return None;
            }
            entry
        };

        match tokio::fs::read(self.blob_path(key)).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    debug!(key = %key, "indexed blob missing, dropping entry");
                } else {
                    warn!(key = %key, error = %e, "failed to read cached image, dropping entry");
                }
                let mut index = self.index.lock().await;
                // a concurrent put may have replaced the entry meanwhile
                if index.get(key) == Some(&entry) {
                    index.remove(key);
                    self.persist(&index).await;
                }
                None
            }
        }
    }

    /// Store `bytes` under `key`, replacing any previous entry.
    ///
    /// The blob is written before the index. Returns `false` if either
    /// write failed; a blob whose index entry never made it to disk is
    /// swept by the next eviction run.
    pub async fn put(
        &self,
        key: &CacheKey,
        dish_name: &str,
        recipe_text: Option<&str>,
        bytes: &[u8],
    ) -> bool {
        let mut index = self.index.lock().await;

        let path = self.blob_path(key);
        if let Err(e) = write_atomic(&path, bytes).await {
            warn!(key = %key, error = %e, "failed to write cached image");
            return false;
        }

        let entry = CacheEntry::new(dish_name, recipe_text, bytes.len() as u64, self.clock.now());
        let previous = index.insert(key.clone(), entry);
        match index.persist(&self.index_path).await {
            Ok(()) => {
                debug!(key = %key, dish = dish_name, bytes = bytes.len(), "cached image");
                true
            }
            Err(e) => {
                // memory stays in step with disk; the blob is left for the orphan sweep
                match previous {
                    Some(previous) => index.insert(key.clone(), previous),
                    None => index.remove(key),
                };
                warn!(key = %key, error = %e, "wrote image but failed to persist index");
                false
            }
        }
    }

    /// Whether `key` has an index entry (regardless of TTL).
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().await.contains(key)
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        CacheStats {
            entries: index.len(),
            total_bytes: index.total_bytes(),
        }
    }

    /// Run the TTL and size passes, heal entries whose blob is gone, and
    /// sweep files no entry refers to.
    pub async fn evict(&self, policy: &EvictionPolicy) -> EvictionReport {
        let mut index = self.index.lock().await;
        let mut report = EvictionReport::default();
        let mut dirty = false;

        let indexed: Vec<CacheKey> = index.iter().map(|(key, _)| key.clone()).collect();
        for key in indexed {
            if !tokio::fs::try_exists(self.blob_path(&key)).await.unwrap_or(true) {
                index.remove(&key);
                report.healed += 1;
                dirty = true;
            }
        }

        let plan = policy.plan(&index, self.clock.now());
        for key in &plan.expired {
            if let Some(entry) = index.remove(key) {
                report.expired_removed += 1;
                report.freed_bytes += entry.size_bytes;
                if !self.remove_blob(key).await {
                    report.errors += 1;
                }
                dirty = true;
            }
        }
        for key in &plan.oversize {
            if let Some(entry) = index.remove(key) {
                report.size_evicted += 1;
                report.freed_bytes += entry.size_bytes;
                if !self.remove_blob(key).await {
                    report.errors += 1;
                }
                dirty = true;
            }
        }

        match self.sweep_orphans(&index).await {
            Ok((swept, freed)) => {
                report.orphans_swept = swept;
                report.freed_bytes += freed;
            }
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to scan cache directory");
                report.errors += 1;
            }
        }

        if dirty {
            self.persist(&index).await;
        }

        report.remaining_entries = index.len();
        report.remaining_bytes = index.total_bytes();

        counter!(telemetry::EVICTED_TOTAL, "pass" => "ttl").increment(report.expired_removed as u64);
        counter!(telemetry::EVICTED_TOTAL, "pass" => "size").increment(report.size_evicted as u64);
        counter!(telemetry::EVICTED_TOTAL, "pass" => "healed").increment(report.healed as u64);
        counter!(telemetry::EVICTED_TOTAL, "pass" => "orphan").increment(report.orphans_swept as u64);

        info!(
            expired = report.expired_removed,
            size_evicted = report.size_evicted,
            healed = report.healed,
            orphans = report.orphans_swept,
            freed_bytes = report.freed_bytes,
            remaining = report.remaining_entries,
            "cache eviction finished"
        );
        report
    }

    /// Check that the cache directory accepts writes.
    pub async fn is_writable(&self) -> bool {
        let probe = self.dir.join(format!(".probe.{TEMP_EXTENSION}"));
        let ok = tokio::fs::write(&probe, b"ok").await.is_ok();
        let _ = tokio::fs::remove_file(&probe).await;
        ok
    }

    /// Delete blobs that no index entry names, and leftover temp files.
    ///
    /// Files that don't look like ours (other names or extensions, the
    /// index itself) are left alone. Caller holds the index lock.
    async fn sweep_orphans(&self, index: &CacheIndex) -> std::io::Result<(usize, u64)> {
        let mut swept = 0;
        let mut freed = 0;
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == INDEX_FILE || !is_orphan(name, index) {
                continue;
            }
            let size = item.metadata().await.map(|m| m.len()).unwrap_or(0);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(file = name, "swept orphaned cache file");
                    swept += 1;
                    freed += size;
                }
                Err(e) => warn!(file = name, error = %e, "failed to remove orphaned cache file"),
            }
        }
        Ok((swept, freed))
    }

    /// Returns false only when the blob exists but could not be removed.
    async fn remove_blob(&self, key: &CacheKey) -> bool {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to remove cached image");
                false
            }
        }
    }

    async fn persist(&self, index: &CacheIndex) {
        if let Err(e) = index.persist(&self.index_path).await {
            warn!(path = %self.index_path.display(), error = %e, "failed to persist cache index");
        }
    }
}

fn is_orphan(name: &str, index: &CacheIndex) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    match ext {
        TEMP_EXTENSION => true,
        BLOB_EXTENSION => CacheKey::parse(stem).is_some_and(|key| !index.contains(&key)),
        _ => false,
    }
}

/// Write via a sibling temp file so readers never see a partial blob.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("{BLOB_EXTENSION}.{TEMP_EXTENSION}"));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
