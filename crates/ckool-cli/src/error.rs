//! Error types for the ckool CLI
//!
//! Every variant renders as a user-facing message that says what to do next.

use ckool_pipeline::PipelineError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Package directory not found: '{0}'. Pass the path of an existing package folder.")]
    NotADirectory(String),

    #[error("{count} job(s) failed:\n{details}\nFinished archives and cache records were kept; rerun the command to resume.")]
    JobsFailed { count: usize, details: String },

    #[error("Configuration error: {0}. Check the CKOOL_* environment variables or the --config file.")]
    Config(String),

    #[error("Invalid filter pattern: {0}. --include and --exclude take regular expressions.")]
    InvalidPattern(String),

    #[error("{0}. Rename the file or the directory so every resource name is unique.")]
    NameCollision(String),

    #[error("Cache record is corrupt: {0}. Rerun with --overwrite to rebuild it.")]
    CorruptCache(String),

    #[error("{0}")]
    Pipeline(PipelineError),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_)
            | CliError::InvalidPattern(_)
            | CliError::NotADirectory(_)
            | CliError::NameCollision(_) => 2,
            _ => 1,
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotADirectory(path) => CliError::NotADirectory(path.display().to_string()),
            PipelineError::Aggregate(aggregate) => CliError::JobsFailed {
                count: aggregate.len(),
                details: aggregate
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            PipelineError::Config(msg) => CliError::Config(msg),
            PipelineError::Common(ckool_common::CkoolError::Config(msg)) => CliError::Config(msg),
            err @ PipelineError::Common(
                ckool_common::CkoolError::UnsupportedAlgorithm(_)
                | ckool_common::CkoolError::UnsupportedFormat(_),
            ) => CliError::Config(err.to_string()),
            err @ PipelineError::InvalidPattern { .. } => CliError::InvalidPattern(err.to_string()),
            err @ PipelineError::ResourceNameCollision { .. } => {
                CliError::NameCollision(err.to_string())
            }
            err @ PipelineError::CorruptCache { .. } => CliError::CorruptCache(err.to_string()),
            other => CliError::Pipeline(other),
        }
    }
}
