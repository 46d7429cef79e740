//! The package pipeline: compress → hash → upload on the scheduler
//!
//! Directory items start at `compress`, plain files at `hash`. The
//! `compress` stage always posts a completion, also when it reuses an
//! existing archive, so the job estimate matches the real chains exactly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::CacheRecord;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::graph::JobGraph;
use crate::job::{job_fn, ConcurrencyClass, JobDescriptor, ReturnPayload};
use crate::planner::{check_resource_names, Planner, WorkItem, WorkKind};
use crate::preparer::FilePreparer;
use crate::progress::{NoProgress, ProgressSink};
use crate::scheduler::{run_graph, RunSummary, SchedulerConfig};
use crate::upload::{UploadBackend, UploadDispatcher, UploadPolicy, UploadReceipt};

pub const COMPRESS: &str = "compress";
pub const HASH: &str = "hash";
pub const UPLOAD: &str = "upload";

/// Keyword payload of the compress stage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Artifact {
    path: PathBuf,
}

pub struct PackagePipeline {
    config: PipelineConfig,
    progress: Arc<dyn ProgressSink>,
    uploader: Option<Arc<dyn UploadBackend>>,
}

impl PackagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
            uploader: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Append an upload stage after hashing
    pub fn with_uploader(mut self, backend: Arc<dyn UploadBackend>) -> Self {
        self.uploader = Some(backend);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Work items for `root` under the configured filters.
    ///
    /// Fails when two items would publish under the same resource name.
    pub fn plan(&self, root: impl AsRef<Path>) -> Result<Vec<WorkItem>> {
        let items = Planner::new(self.config.tmp_dir_name.clone())
            .plan(
                root,
                self.config.include_pattern.as_deref(),
                self.config.exclude_pattern.as_deref(),
            )?
            .collect::<Result<Vec<_>>>()?;
        check_resource_names(&items, self.config.compression)?;
        Ok(items)
    }

    /// Graph with one chain per work item
    pub fn build_graph(&self, items: &[WorkItem]) -> Result<JobGraph> {
        let preparer = Arc::new(
            FilePreparer::new(&self.config).with_progress(Arc::clone(&self.progress)),
        );

        let compress = {
            let preparer = Arc::clone(&preparer);
            job_fn(move |input| {
                let item: WorkItem = input.arg(0)?;
                let path = preparer.materialize(&item)?;
                Ok(ReturnPayload::keyword_from(&Artifact { path })?)
            })
        };
        let hash = {
            let preparer = Arc::clone(&preparer);
            job_fn(move |input| {
                let path: PathBuf = input.kwarg("path")?;
                let record = preparer.hash(&path)?;
                Ok(ReturnPayload::keyword_from(&record)?)
            })
        };

        let mut builder = JobGraph::builder()
            .register(COMPRESS, ConcurrencyClass::Process, compress)
            .register(HASH, ConcurrencyClass::Process, hash)
            .trigger(COMPRESS, HASH, true);

        if let Some(backend) = &self.uploader {
            let dispatcher = Arc::new(UploadDispatcher::new(
                Arc::clone(backend),
                UploadPolicy::from(&self.config),
            ));
            let upload = job_fn(move |input| {
                let record: CacheRecord = input.kwargs_as()?;
                let receipt = dispatcher.dispatch(&record)?;
                Ok(ReturnPayload::keyword_from(&receipt)?)
            });
            builder = builder
                .register(UPLOAD, ConcurrencyClass::Thread, upload)
                .trigger(HASH, UPLOAD, true);
        }

        for item in items {
            builder = builder.start(start_descriptor(item)?);
        }
        builder.build()
    }

    /// Plan, build and run the pipeline for `root`
    pub fn run(&self, root: impl AsRef<Path>) -> Result<RunSummary> {
        let root = root.as_ref();
        let items = self.plan(root)?;
        info!(root = %root.display(), items = items.len(), "preparing package");

        let graph = self.build_graph(&items)?;
        run_graph(graph, SchedulerConfig::from(&self.config))
    }
}

fn start_descriptor(item: &WorkItem) -> Result<JobDescriptor> {
    match item.kind {
        WorkKind::Directory => JobDescriptor::new(COMPRESS).arg_serialized(item),
        WorkKind::File => Ok(JobDescriptor::new(HASH)
            .kwarg("path", item.path.to_string_lossy().into_owned())),
    }
}

/// Cache records produced by the hash stage of a run without upload
pub fn hashed_records(summary: &RunSummary) -> Result<Vec<CacheRecord>> {
    summary
        .outputs_of(HASH)
        .map(ReturnPayload::keyword_as)
        .collect()
}

/// Receipts produced by the upload stage
pub fn upload_receipts(summary: &RunSummary) -> Result<Vec<UploadReceipt>> {
    summary
        .outputs_of(UPLOAD)
        .map(ReturnPayload::keyword_as)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::upload::DirectoryBackend;
    use tempfile::TempDir;

    fn package() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bravo").unwrap();
        dir
    }

    #[test]
    fn test_graph_estimate_without_upload() {
        let dir = package();
        let pipeline = PackagePipeline::new(PipelineConfig::default());
        let items = pipeline.plan(dir.path()).unwrap();
        let estimate = pipeline.build_graph(&items).unwrap().estimate();

        // sub: compress + hash, a.txt: hash
        assert_eq!(estimate.expected_process_completions, 3);
        assert_eq!(estimate.expected_thread_completions, 0);
    }

    #[test]
    fn test_graph_estimate_with_upload() {
        let dir = package();
        let mirror = TempDir::new().unwrap();
        let pipeline = PackagePipeline::new(PipelineConfig::default())
            .with_uploader(Arc::new(DirectoryBackend::new(mirror.path())));
        let items = pipeline.plan(dir.path()).unwrap();
        let estimate = pipeline.build_graph(&items).unwrap().estimate();

        assert_eq!(estimate.expected_process_completions, 3);
        assert_eq!(estimate.expected_thread_completions, 2);
    }

    #[test]
    fn test_start_descriptors_by_kind() {
        let file = WorkItem {
            kind: WorkKind::File,
            path: PathBuf::from("/pkg/a.txt"),
            include_pattern: None,
            exclude_pattern: None,
        };
        let descriptor = start_descriptor(&file).unwrap();
        assert_eq!(descriptor.function.as_str(), HASH);
        assert_eq!(descriptor.kwargs["path"], "/pkg/a.txt");

        let dir = WorkItem {
            kind: WorkKind::Directory,
            path: PathBuf::from("/pkg/sub"),
            ..file
        };
        let descriptor = start_descriptor(&dir).unwrap();
        assert_eq!(descriptor.function.as_str(), COMPRESS);
        assert_eq!(descriptor.args.len(), 1);
    }
}
