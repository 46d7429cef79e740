//! File preparation: archive directories, hash artifacts, record the results

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ckool_common::checksum::compute_checksum_with_progress;
use ckool_common::{CompressionFormat, HashAlgorithm};
use tracing::{debug, info, instrument};

use crate::archive;
use crate::cache::{modified_secs, CacheRecord, ContentCache};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::planner::{WorkItem, WorkKind};
use crate::progress::{NoProgress, ProgressSink};

#[derive(Clone)]
pub struct FilePreparer {
    cache: ContentCache,
    hash_algorithm: HashAlgorithm,
    compression: CompressionFormat,
    block_size: usize,
    overwrite: bool,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for FilePreparer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePreparer")
            .field("cache", &self.cache)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("compression", &self.compression)
            .field("block_size", &self.block_size)
            .field("overwrite", &self.overwrite)
            .finish_non_exhaustive()
    }
}

impl FilePreparer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            cache: ContentCache::new(config.tmp_dir_name.clone()),
            hash_algorithm: config.hash_algorithm,
            compression: config.compression,
            block_size: config.block_size,
            overwrite: config.overwrite,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Archive step then hash step
    pub fn prepare(&self, item: &WorkItem) -> Result<CacheRecord> {
        let target = self.materialize(item)?;
        self.hash(&target)
    }

    /// Path of the artifact that will be uploaded for `item`.
    ///
    /// Files pass through untouched. Directories are archived into the
    /// temporary directory next to them unless an archive whose member
    /// manifest matches the current listing (names, sizes, mtimes after
    /// filtering) is already there. A rebuilt archive drops its old cache
    /// record.
    #[instrument(skip(self, item), fields(path = %item.path.display()))]
    pub fn materialize(&self, item: &WorkItem) -> Result<PathBuf> {
        if item.kind == WorkKind::File {
            return Ok(item.path.clone());
        }

        let parent = item.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_dir = self.cache.tmp_dir(parent);
        let destination = archive::archive_path(&tmp_dir, &item.path, self.compression);
        let files = archive::collect_files(&item.path, &item.filter()?)?;

        if !self.overwrite {
            let current = archive::archive_members(&item.path, &files)?;
            if archive::read_manifest(&destination)?.as_ref() == Some(&current) {
                info!(archive = %destination.display(), "reusing existing archive");
                return Ok(destination);
            }
        }

        self.cache.invalidate(&destination)?;
        archive::compress(
            &item.path,
            &destination,
            &files,
            self.compression,
            self.progress.as_ref(),
        )
    }

    /// Hash `path`, reading a fresh cache record instead when one exists
    #[instrument(skip(self, path), fields(path = %path.display(), algorithm = %self.hash_algorithm))]
    pub fn hash(&self, path: &Path) -> Result<CacheRecord> {
        if !self.overwrite {
            if let Some(record) = self.cache.lookup_fresh(path, self.hash_algorithm)? {
                return Ok(record);
            }
        }

        let mut file = File::open(path)?;
        let metadata = file.metadata()?;
        let progress = self.progress.as_ref();
        progress.begin("hash", path, metadata.len());

        let hash = compute_checksum_with_progress(
            &mut file,
            self.hash_algorithm,
            self.block_size,
            |bytes| progress.advance(bytes),
        )?;
        progress.finish(path);

        let record = CacheRecord {
            file: path.to_path_buf(),
            hash,
            hash_type: self.hash_algorithm,
            size: metadata.len(),
            modified: modified_secs(&metadata),
        };
        self.cache.store(&record)?;
        debug!(hash = %record.hash, size = record.size, "hashed");
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::progress::testing::CountingProgress;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn item(kind: WorkKind, path: PathBuf) -> WorkItem {
        WorkItem {
            kind,
            path,
            include_pattern: None,
            exclude_pattern: None,
        }
    }

    fn package() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bravo").unwrap();
        dir
    }

    #[test]
    fn test_prepare_file_writes_record() {
        let dir = package();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let record = preparer
            .prepare(&item(WorkKind::File, dir.path().join("a.txt")))
            .unwrap();

        assert_eq!(
            record.hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(record.size, 11);
        assert_eq!(record.hash_type, HashAlgorithm::Sha256);
        assert!(dir.path().join(".ckool/a.txt.json").exists());
    }

    #[test]
    fn test_prepare_is_idempotent_and_reads_cache() {
        let dir = package();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let work = item(WorkKind::File, dir.path().join("a.txt"));
        preparer.prepare(&work).unwrap();

        let stats = dir.path().join(".ckool/a.txt.json");
        let mut record: CacheRecord =
            serde_json::from_str(&std::fs::read_to_string(&stats).unwrap()).unwrap();
        record.hash = "feedface".to_string();
        std::fs::write(&stats, serde_json::to_string(&record).unwrap()).unwrap();

        let second = preparer.prepare(&work).unwrap();
        assert_eq!(second.hash, "feedface");
    }

    #[test]
    fn test_overwrite_ignores_cache() {
        let dir = package();
        let work = item(WorkKind::File, dir.path().join("a.txt"));
        FilePreparer::new(&PipelineConfig::default())
            .prepare(&work)
            .unwrap();

        let stats = dir.path().join(".ckool/a.txt.json");
        let text = std::fs::read_to_string(&stats).unwrap();
        std::fs::write(&stats, text.replace("b94d27", "000000")).unwrap();

        let config = PipelineConfig {
            overwrite: true,
            ..Default::default()
        };
        let record = FilePreparer::new(&config).prepare(&work).unwrap();
        assert!(record.hash.starts_with("b94d27"));
    }

    #[test]
    fn test_prepare_directory_archives_then_hashes() {
        let dir = package();
        let progress = Arc::new(CountingProgress::default());
        let preparer =
            FilePreparer::new(&PipelineConfig::default()).with_progress(progress.clone());

        let record = preparer
            .prepare(&item(WorkKind::Directory, dir.path().join("sub")))
            .unwrap();

        let archive = dir.path().join(".ckool/sub.zip");
        assert_eq!(record.file, archive);
        assert!(dir.path().join(".ckool/sub.zip.json").exists());
        assert_eq!(
            progress.seen.load(Ordering::SeqCst),
            progress.expected.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_existing_archive_is_reused() {
        let dir = package();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let work = item(WorkKind::Directory, dir.path().join("sub"));

        let first = preparer.materialize(&work).unwrap();
        let stamp = std::fs::metadata(&first).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = preparer.materialize(&work).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), stamp);
    }

    fn zip_names(path: &Path) -> Vec<String> {
        let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn test_deleted_member_rebuilds_archive() {
        let dir = package();
        std::fs::write(dir.path().join("sub/c.txt"), b"charlie").unwrap();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let work = item(WorkKind::Directory, dir.path().join("sub"));

        let first = preparer.prepare(&work).unwrap();
        assert_eq!(zip_names(&first.file), vec!["sub/b.txt", "sub/c.txt"]);

        std::fs::remove_file(dir.path().join("sub/c.txt")).unwrap();
        let second = preparer.prepare(&work).unwrap();

        assert_eq!(zip_names(&second.file), vec!["sub/b.txt"]);
        assert_ne!(second.hash, first.hash);
    }

    #[test]
    fn test_changed_filter_rebuilds_archive() {
        let dir = package();
        std::fs::write(dir.path().join("sub/debug.log"), b"noise").unwrap();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let mut work = item(WorkKind::Directory, dir.path().join("sub"));

        let first = preparer.prepare(&work).unwrap();
        assert_eq!(zip_names(&first.file), vec!["sub/b.txt", "sub/debug.log"]);

        work.exclude_pattern = Some(r"\.log$".to_string());
        let second = preparer.prepare(&work).unwrap();
        assert_eq!(zip_names(&second.file), vec!["sub/b.txt"]);
        assert_ne!(second.hash, first.hash);
    }

    #[test]
    fn test_older_file_moved_in_rebuilds_archive() {
        let dir = package();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let work = item(WorkKind::Directory, dir.path().join("sub"));
        preparer.prepare(&work).unwrap();

        let moved = dir.path().join("sub/old.txt");
        std::fs::write(&moved, b"from last year").unwrap();
        File::options()
            .write(true)
            .open(&moved)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000))
            .unwrap();

        let record = preparer.prepare(&work).unwrap();
        assert_eq!(zip_names(&record.file), vec!["sub/b.txt", "sub/old.txt"]);
    }

    #[test]
    fn test_missing_file_propagates_io_error() {
        let dir = TempDir::new().unwrap();
        let preparer = FilePreparer::new(&PipelineConfig::default());
        let result = preparer.prepare(&item(WorkKind::File, dir.path().join("gone.bin")));
        assert!(matches!(result, Err(crate::PipelineError::Io(_))));
    }
}
