//! On-disk content cache
//!
//! One JSON stats file per prepared artifact. A plain file `root/a.txt` is
//! recorded in `root/.ckool/a.txt.json`; an archive that already lives in the
//! temporary directory (`root/.ckool/sub.zip`) is recorded next to itself in
//! `root/.ckool/sub.zip.json`.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ckool_common::HashAlgorithm;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{PipelineError, Result};

/// Persisted content metadata of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub file: PathBuf,
    pub hash: String,
    pub hash_type: HashAlgorithm,
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

impl CacheRecord {
    /// File name of the artifact, used as the resource name on upload
    pub fn name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string())
    }
}

/// Modification time of `path` in whole seconds
pub fn modified_secs(metadata: &std::fs::Metadata) -> Option<u64> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

#[derive(Debug, Clone)]
pub struct ContentCache {
    tmp_dir_name: String,
}

impl ContentCache {
    pub fn new(tmp_dir_name: impl Into<String>) -> Self {
        Self {
            tmp_dir_name: tmp_dir_name.into(),
        }
    }

    pub fn tmp_dir_name(&self) -> &str {
        &self.tmp_dir_name
    }

    /// Temporary directory belonging to a package root
    pub fn tmp_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.tmp_dir_name)
    }

    /// Derive the stats-file location for `target`
    pub fn stats_path(&self, target: &Path) -> PathBuf {
        let parent = target.parent().unwrap_or_else(|| Path::new(""));
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let in_tmp_dir = parent
            .file_name()
            .is_some_and(|n| n == self.tmp_dir_name.as_str());

        if in_tmp_dir {
            parent.join(format!("{}.json", name))
        } else {
            parent.join(&self.tmp_dir_name).join(format!("{}.json", name))
        }
    }

    /// Read the record for `target`, if one has been stored
    pub fn load(&self, target: &Path) -> Result<Option<CacheRecord>> {
        let stats = self.stats_path(target);
        let text = match std::fs::read_to_string(&stats) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| PipelineError::CorruptCache { path: stats, source })
    }

    /// Return the stored record only while it still describes `target`
    pub fn lookup_fresh(
        &self,
        target: &Path,
        algorithm: HashAlgorithm,
    ) -> Result<Option<CacheRecord>> {
        let Some(record) = self.load(target)? else {
            trace!(path = %target.display(), "no cache record");
            return Ok(None);
        };

        let metadata = match std::fs::metadata(target) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let fresh = record.file.as_path() == target
            && record.hash_type == algorithm
            && record.size == metadata.len()
            && record.modified.is_some()
            && record.modified == modified_secs(&metadata);

        if fresh {
            debug!(path = %target.display(), hash = %record.hash, "cache hit");
            Ok(Some(record))
        } else {
            debug!(path = %target.display(), "cache record is stale");
            Ok(None)
        }
    }

    /// Remove the record for `target`, if any
    pub fn invalidate(&self, target: &Path) -> Result<()> {
        let stats = self.stats_path(target);
        match std::fs::remove_file(&stats) {
            Ok(()) => {
                debug!(stats = %stats.display(), "dropped cache record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `record` to the stats file derived from its `file`
    pub fn store(&self, record: &CacheRecord) -> Result<PathBuf> {
        let stats = self.stats_path(&record.file);
        if let Some(dir) = stats.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(record).map_err(ckool_common::CkoolError::from)?;
        std::fs::write(&stats, json)?;
        debug!(stats = %stats.display(), "stored cache record");
        Ok(stats)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_for(path: &Path, hash: &str) -> CacheRecord {
        let metadata = std::fs::metadata(path).unwrap();
        CacheRecord {
            file: path.to_path_buf(),
            hash: hash.to_string(),
            hash_type: HashAlgorithm::Sha256,
            size: metadata.len(),
            modified: modified_secs(&metadata),
        }
    }

    #[test]
    fn test_stats_path_for_plain_file() {
        let cache = ContentCache::new(".ckool");
        assert_eq!(
            cache.stats_path(Path::new("/pkg/a.txt")),
            PathBuf::from("/pkg/.ckool/a.txt.json")
        );
    }

    #[test]
    fn test_stats_path_for_archive_in_tmp_dir() {
        let cache = ContentCache::new(".ckool");
        assert_eq!(
            cache.stats_path(Path::new("/pkg/.ckool/sub.zip")),
            PathBuf::from("/pkg/.ckool/sub.zip.json")
        );
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        let cache = ContentCache::new(".ckool");
        let record = record_for(&file, "abc");
        let stats = cache.store(&record).unwrap();
        assert!(stats.ends_with(".ckool/a.txt.json"));

        let found = cache.lookup_fresh(&file, HashAlgorithm::Sha256).unwrap();
        assert_eq!(found, Some(record));
    }

    #[test]
    fn test_lookup_rejects_other_algorithm_and_size_change() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        let cache = ContentCache::new(".ckool");
        cache.store(&record_for(&file, "abc")).unwrap();

        assert_eq!(cache.lookup_fresh(&file, HashAlgorithm::Md5).unwrap(), None);

        std::fs::write(&file, b"longer content").unwrap();
        assert_eq!(cache.lookup_fresh(&file, HashAlgorithm::Sha256).unwrap(), None);
    }

    #[test]
    fn test_lookup_rejects_record_of_other_file() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join(".ckool");
        std::fs::create_dir_all(&tmp).unwrap();
        let plain = dir.path().join("sub.zip");
        let archive = tmp.join("sub.zip");
        std::fs::write(&plain, b"same").unwrap();
        std::fs::write(&archive, b"same").unwrap();

        let cache = ContentCache::new(".ckool");
        assert_eq!(cache.stats_path(&plain), cache.stats_path(&archive));
        cache.store(&record_for(&plain, "abc")).unwrap();

        assert!(cache.lookup_fresh(&plain, HashAlgorithm::Sha256).unwrap().is_some());
        assert_eq!(cache.lookup_fresh(&archive, HashAlgorithm::Sha256).unwrap(), None);
    }

    #[test]
    fn test_invalidate_removes_record() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        let cache = ContentCache::new(".ckool");
        let stats = cache.store(&record_for(&file, "abc")).unwrap();
        cache.invalidate(&file).unwrap();
        assert!(!stats.exists());
        // Nothing left to remove
        cache.invalidate(&file).unwrap();
    }

    #[test]
    fn test_record_without_modified_is_stale() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        let cache = ContentCache::new(".ckool");
        let stats = cache.stats_path(&file);
        std::fs::create_dir_all(stats.parent().unwrap()).unwrap();
        std::fs::write(
            &stats,
            format!(
                r#"{{"file": "{}", "hash": "abc", "hash_type": "sha256", "size": 7}}"#,
                file.display()
            ),
        )
        .unwrap();

        let loaded = cache.load(&file).unwrap().unwrap();
        assert_eq!(loaded.modified, None);
        assert_eq!(cache.lookup_fresh(&file, HashAlgorithm::Sha256).unwrap(), None);
    }

    #[test]
    fn test_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"content").unwrap();

        let cache = ContentCache::new(".ckool");
        let stats = cache.stats_path(&file);
        std::fs::create_dir_all(stats.parent().unwrap()).unwrap();
        std::fs::write(&stats, "{not json").unwrap();

        assert!(matches!(
            cache.load(&file),
            Err(PipelineError::CorruptCache { .. })
        ));
    }

    #[test]
    fn test_missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(".ckool");
        assert!(cache.load(&dir.path().join("nope")).unwrap().is_none());
    }
}
