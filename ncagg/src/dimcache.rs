//! On-disk dimension cache store, staleness-checked against each member's
//! mtime (`if modified != self.modified { ... }`).
//!
//! One file per member, named by [`mangle`]. Entries are protected with an
//! advisory file lock (`fs2`) so two processes racing to fill the same
//! member's cache don't corrupt each other's write.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;

use crate::member::MemberHandle;
use crate::{AggError, AggResult};

/// Replace characters that can't appear in a filename component on the
/// host filesystems we care about. `'/'` would otherwise escape the cache
/// directory entirely.
pub fn mangle(location: &str) -> String {
    location.chars().map(|c| match c {
        ' ' => '#',
        '/' => '#',
        c => c,
    }).collect()
}

pub struct CacheStore {
    directory: PathBuf,
    prefix: String,
    max_bytes: u64,
}

impl CacheStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, max_bytes: u64) -> CacheStore {
        CacheStore {
            directory: directory.into(),
            prefix: prefix.into(),
            max_bytes,
        }
    }

    fn entry_path(&self, location: &str) -> PathBuf {
        self.directory.join(format!("{}{}", self.prefix, mangle(location)))
    }

    /// A cache entry is usable only if it exists, is non-empty, and is no
    /// older than the source file it describes.
    fn is_fresh(&self, path: &Path, source_mtime: SystemTime) -> AggResult<bool> {
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(AggError::cache(e.to_string())),
        };
        if meta.len() == 0 {
            return Ok(false);
        }
        let cache_mtime = meta.modified().map_err(|e| AggError::cache(e.to_string()))?;
        Ok(cache_mtime >= source_mtime)
    }

    /// Ensure `member`'s dimension cache is populated, using the on-disk
    /// entry if it's still fresh, otherwise recomputing from the member's
    /// data tree and persisting the result.
    ///
    /// Protocol: take a shared lock and try to read; if the entry is
    /// missing or stale, drop to an exclusive lock, recompute, and write.
    /// Anyone else hitting this concurrently blocks on the exclusive lock
    /// and then re-validates, so only one writer ever recomputes.
    pub async fn load_or_compute(
        &self,
        member: &MemberHandle,
        source_mtime: SystemTime,
    ) -> AggResult<()> {
        fs::create_dir_all(&self.directory).map_err(|e| AggError::cache(e.to_string()))?;
        let path = self.entry_path(member.get_location());

        if self.is_fresh(&path, source_mtime)? {
            if let Ok(file) = File::open(&path) {
                file.lock_shared().map_err(|e| AggError::cache(e.to_string()))?;
                let result = member.load_dimension_cache(BufReader::new(&file));
                FileExt::unlock(&file).ok();
                if result.is_ok() {
                    return Ok(());
                }
                warn!("dimension cache at {:?} was corrupt, recomputing", path);
            }
        }

        self.recompute_and_store(member, &path).await?;
        self.evict_if_needed()?;
        Ok(())
    }

    async fn recompute_and_store(&self, member: &MemberHandle, path: &Path) -> AggResult<()> {
        member.fill_dimension_cache_by_using_data_tree().await?;

        let file = File::create(path).map_err(|e| AggError::cache(e.to_string()))?;
        file.lock_exclusive().map_err(|e| AggError::cache(e.to_string()))?;
        let result = member.save_dimension_cache(BufWriter::new(&file));
        FileExt::unlock(&file).ok();
        result.map_err(|e| AggError::cache(e.to_string()))
    }

    /// Oldest-entry-first eviction down to the configured size budget.
    /// Named "LRU-ish" because freshness is tracked by mtime, not by true
    /// access recency.
    fn evict_if_needed(&self) -> AggResult<()> {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut total: u64 = 0;

        for entry in fs::read_dir(&self.directory).map_err(|e| AggError::cache(e.to_string()))? {
            let entry = entry.map_err(|e| AggError::cache(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&self.prefix) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| AggError::cache(e.to_string()))?;
            let mtime = meta.modified().map_err(|e| AggError::cache(e.to_string()))?;
            total += meta.len();
            entries.push((entry.path(), meta.len(), mtime));
        }

        if total <= self.max_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, mtime)| *mtime);
        for (path, len, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(len);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatasetTree;
    use std::sync::Arc;

    #[test]
    fn mangle_replaces_slashes_and_spaces() {
        assert_eq!(mangle("/data/my file.nc"), "#data#my#file.nc");
    }

    #[tokio::test]
    async fn fills_from_tree_when_no_entry_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "ncagg_dimcache_", 1024 * 1024);

        let member = MemberHandle::from_tree("m0.nc", None, Arc::new(DatasetTree::default()));
        store.load_or_compute(&member, SystemTime::UNIX_EPOCH).await.unwrap();

        let path = store.entry_path("m0.nc");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn stale_entry_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), "ncagg_dimcache_", 1024 * 1024);
        let member = MemberHandle::from_tree("m0.nc", None, Arc::new(DatasetTree::default()));

        store.load_or_compute(&member, SystemTime::UNIX_EPOCH).await.unwrap();
        let path = store.entry_path("m0.nc");
        let first_write = fs::metadata(&path).unwrap().modified().unwrap();

        let far_future = SystemTime::now() + std::time::Duration::from_secs(60 * 60 * 24 * 365);
        store.load_or_compute(&member, far_future).await.unwrap();
        let second_write = fs::metadata(&path).unwrap().modified().unwrap();

        assert!(second_write >= first_write);
    }
}
