//! Error types for the package pipeline

use std::fmt;
use std::path::PathBuf;

use ckool_common::CkoolError;
use thiserror::Error;

use crate::job::{ConcurrencyClass, FunctionId, JobId};

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Package root is missing or is a plain file
    #[error("Not a directory: '{0}'")]
    NotADirectory(PathBuf),

    /// A plain file and a directory archive would publish under one name
    #[error("Resource name '{name}' is produced by both '{file}' and the archive of '{directory}'")]
    ResourceNameCollision {
        name: String,
        file: PathBuf,
        directory: PathBuf,
    },

    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] CkoolError),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Cache record '{path}' is unreadable: {source}")]
    CorruptCache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown job function '{0}'")]
    UnknownFunction(FunctionId),

    #[error("No concurrency class declared for job function '{0}'")]
    MissingClass(FunctionId),

    #[error("Trigger map contains a cycle through '{0}'")]
    CycleDetected(FunctionId),

    #[error("Invalid job argument: {0}")]
    InvalidArgument(String),

    #[error("Keyword payload must serialize to a JSON object, got {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Scheduling inconsistency: {0}")]
    SchedulingInconsistency(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Upload failed for '{file}': {reason}")]
    Upload { file: PathBuf, reason: String },

    #[error("Insufficient space on remote for '{file}': need {required} bytes, {available} available")]
    InsufficientSpace {
        file: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Errors collected by the scheduler, if this is an aggregate
    pub fn job_errors(&self) -> &[ErrorEnvelope] {
        match self {
            PipelineError::Aggregate(aggregate) => &aggregate.errors,
            _ => &[],
        }
    }
}

/// A job failure annotated with the function and job that raised it.
///
/// Workers post these on their completion channel instead of unwinding, so
/// a failing job never takes the control loop down with it.
#[derive(Debug)]
pub struct ErrorEnvelope {
    pub function: FunctionId,
    pub job_id: JobId,
    pub class: ConcurrencyClass,
    pub error: anyhow::Error,
}

impl ErrorEnvelope {
    pub fn new(
        function: FunctionId,
        job_id: JobId,
        class: ConcurrencyClass,
        error: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            function,
            job_id,
            class,
            error: error.into(),
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job '{}' ({}) failed: {:#}", self.function, self.job_id, self.error)
    }
}

impl std::error::Error for ErrorEnvelope {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error.as_ref())
    }
}

/// Every job failure observed before a run was aborted
#[derive(Debug, Default)]
pub struct AggregateError {
    pub errors: Vec<ErrorEnvelope>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorEnvelope> {
        self.errors.iter()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job(s) failed", self.errors.len())?;
        for envelope in &self.errors {
            write!(f, "\n  - {}", envelope)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
