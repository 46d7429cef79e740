//! Upload dispatch: pick API or SCP per resource and call a backend
//!
//! The transports themselves live behind [`UploadBackend`]. Files up to the
//! API limit go through the repository API; anything larger is copied over
//! SCP, which first requires the remote to report enough free space.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::cache::CacheRecord;
use crate::config::{PipelineConfig, DEFAULT_API_UPLOAD_LIMIT};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMethod {
    Api,
    Scp,
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMethod::Api => write!(f, "api"),
            UploadMethod::Scp => write!(f, "scp"),
        }
    }
}

/// What the repository reports back for an uploaded resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// Transport to the data repository
pub trait UploadBackend: Send + Sync {
    fn upload(&self, method: UploadMethod, record: &CacheRecord) -> anyhow::Result<UploadReceipt>;

    /// Free bytes on the SCP target, `None` when unknown or unlimited
    fn available_space(&self) -> anyhow::Result<Option<u64>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub api_upload_limit: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            api_upload_limit: DEFAULT_API_UPLOAD_LIMIT,
        }
    }
}

impl From<&PipelineConfig> for UploadPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            api_upload_limit: config.api_upload_limit,
        }
    }
}

pub struct UploadDispatcher<B> {
    backend: B,
    policy: UploadPolicy,
}

impl<B: UploadBackend> UploadDispatcher<B> {
    pub fn new(backend: B, policy: UploadPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn choose_method(&self, record: &CacheRecord) -> UploadMethod {
        if record.size <= self.policy.api_upload_limit {
            UploadMethod::Api
        } else {
            UploadMethod::Scp
        }
    }

    #[instrument(skip(self, record), fields(path = %record.file.display(), size = record.size))]
    pub fn dispatch(&self, record: &CacheRecord) -> Result<UploadReceipt> {
        let method = self.choose_method(record);

        if method == UploadMethod::Scp {
            let available = self.backend.available_space().map_err(|e| upload_error(record, e))?;
            if let Some(available) = available {
                if available <= record.size {
                    return Err(PipelineError::InsufficientSpace {
                        file: record.file.clone(),
                        required: record.size,
                        available,
                    });
                }
            }
        }

        let receipt = self
            .backend
            .upload(method, record)
            .map_err(|e| upload_error(record, e))?;
        info!(method = %method, id = %receipt.id, status = %receipt.status, "resource uploaded");
        Ok(receipt)
    }
}

fn upload_error(record: &CacheRecord, error: anyhow::Error) -> PipelineError {
    PipelineError::Upload {
        file: record.file.clone(),
        reason: format!("{:#}", error),
    }
}

/// Mirrors resources into a local directory, one file per resource
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    target: PathBuf,
}

impl DirectoryBackend {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl UploadBackend for DirectoryBackend {
    fn upload(&self, method: UploadMethod, record: &CacheRecord) -> anyhow::Result<UploadReceipt> {
        use anyhow::Context;

        std::fs::create_dir_all(&self.target)
            .with_context(|| format!("cannot create mirror '{}'", self.target.display()))?;
        let name = record.name();
        let destination = self.target.join(&name);
        std::fs::copy(&record.file, &destination)
            .with_context(|| format!("cannot copy '{}'", record.file.display()))?;

        Ok(UploadReceipt {
            id: record.hash.clone(),
            name,
            status: format!("mirrored via {}", method),
        })
    }

    fn available_space(&self) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }
}

impl<T: UploadBackend + ?Sized> UploadBackend for std::sync::Arc<T> {
    fn upload(&self, method: UploadMethod, record: &CacheRecord) -> anyhow::Result<UploadReceipt> {
        (**self).upload(method, record)
    }

    fn available_space(&self) -> anyhow::Result<Option<u64>> {
        (**self).available_space()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ckool_common::HashAlgorithm;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Recording {
        space: Option<u64>,
        calls: Mutex<Vec<UploadMethod>>,
    }

    impl Recording {
        fn new(space: Option<u64>) -> Self {
            Self {
                space,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl UploadBackend for Recording {
        fn upload(&self, method: UploadMethod, record: &CacheRecord) -> anyhow::Result<UploadReceipt> {
            self.calls.lock().unwrap().push(method);
            Ok(UploadReceipt {
                id: "r1".into(),
                name: record.name(),
                status: "ok".into(),
            })
        }

        fn available_space(&self) -> anyhow::Result<Option<u64>> {
            Ok(self.space)
        }
    }

    fn record(size: u64) -> CacheRecord {
        CacheRecord {
            file: PathBuf::from("/pkg/data.bin"),
            hash: "abc".into(),
            hash_type: HashAlgorithm::Sha256,
            size,
            modified: Some(0),
        }
    }

    #[test]
    fn test_small_files_use_api() {
        let dispatcher = UploadDispatcher::new(
            Recording::new(Some(0)),
            UploadPolicy {
                api_upload_limit: 100,
            },
        );
        assert_eq!(dispatcher.choose_method(&record(100)), UploadMethod::Api);
        assert_eq!(dispatcher.choose_method(&record(101)), UploadMethod::Scp);

        dispatcher.dispatch(&record(10)).unwrap();
        assert_eq!(*dispatcher.backend.calls.lock().unwrap(), vec![UploadMethod::Api]);
    }

    #[test]
    fn test_scp_requires_free_space() {
        let policy = UploadPolicy {
            api_upload_limit: 10,
        };
        let full = UploadDispatcher::new(Recording::new(Some(500)), policy);
        let result = full.dispatch(&record(500));
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientSpace { required: 500, available: 500, .. })
        ));
        assert!(full.backend.calls.lock().unwrap().is_empty());

        let roomy = UploadDispatcher::new(Recording::new(Some(501)), policy);
        roomy.dispatch(&record(500)).unwrap();
        assert_eq!(*roomy.backend.calls.lock().unwrap(), vec![UploadMethod::Scp]);
    }

    #[test]
    fn test_directory_backend_mirrors_file() {
        let src = TempDir::new().unwrap();
        let mirror = TempDir::new().unwrap();
        let file = src.path().join("a.txt");
        std::fs::write(&file, b"payload").unwrap();

        let rec = CacheRecord {
            file: file.clone(),
            ..record(7)
        };
        let dispatcher =
            UploadDispatcher::new(DirectoryBackend::new(mirror.path()), UploadPolicy::default());
        let receipt = dispatcher.dispatch(&rec).unwrap();

        assert_eq!(receipt.name, "a.txt");
        assert_eq!(receipt.id, "abc");
        assert_eq!(std::fs::read(mirror.path().join("a.txt")).unwrap(), b"payload");
    }

    #[test]
    fn test_backend_failure_is_upload_error() {
        let mirror = TempDir::new().unwrap();
        let dispatcher =
            UploadDispatcher::new(DirectoryBackend::new(mirror.path()), UploadPolicy::default());
        let result = dispatcher.dispatch(&record(1));
        assert!(matches!(result, Err(PipelineError::Upload { .. })));
    }
}
