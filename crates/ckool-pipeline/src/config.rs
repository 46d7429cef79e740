//! Pipeline configuration
//!
//! Values come from built-in defaults, optionally a TOML file, then `CKOOL_*`
//! environment variables (a `.env` file is honoured through `dotenvy`).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ckool_common::{checksum::DEFAULT_BLOCK_SIZE, CompressionFormat, HashAlgorithm};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Name of the per-package directory holding archives and cache records.
pub const DEFAULT_TMP_DIR_NAME: &str = ".ckool";

/// Control loop sleep between scheduling passes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Files up to this size go through the repository API; larger ones use SCP.
pub const DEFAULT_API_UPLOAD_LIMIT: u64 = 1024 * 1024 * 1024;

/// Configuration for planning, preparation, scheduling and upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Temporary directory name created inside the package root
    pub tmp_dir_name: String,

    pub hash_algorithm: HashAlgorithm,

    pub compression: CompressionFormat,

    /// Read block size used while hashing
    pub block_size: usize,

    pub poll_interval_ms: u64,

    /// Recompute archives and hashes even when cached results exist
    pub overwrite: bool,

    pub api_upload_limit: u64,

    /// Upper bound on concurrently running I/O-bound jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_thread_workers: Option<usize>,

    /// Size of the CPU worker pool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_process_workers: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_pattern: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tmp_dir_name: DEFAULT_TMP_DIR_NAME.to_string(),
            hash_algorithm: HashAlgorithm::default(),
            compression: CompressionFormat::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            overwrite: false,
            api_upload_limit: DEFAULT_API_UPLOAD_LIMIT,
            max_thread_workers: None,
            max_process_workers: None,
            include_pattern: None,
            exclude_pattern: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `CKOOL_*` environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides on top of it
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text).map_err(|e| {
            PipelineError::config(format!("failed to parse '{}': {}", path.display(), e))
        })?;

        dotenvy::dotenv().ok();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(name) = std::env::var("CKOOL_TMP_DIR") {
            self.tmp_dir_name = name;
        }
        if let Ok(value) = std::env::var("CKOOL_HASH") {
            self.hash_algorithm = HashAlgorithm::from_str(&value)?;
        }
        if let Ok(value) = std::env::var("CKOOL_COMPRESSION") {
            self.compression = CompressionFormat::from_str(&value)?;
        }
        if let Some(size) = parse_env::<usize>("CKOOL_BLOCK_SIZE")? {
            self.block_size = size;
        }
        if let Some(ms) = parse_env::<u64>("CKOOL_POLL_INTERVAL_MS")? {
            self.poll_interval_ms = ms;
        }
        if let Some(overwrite) = parse_env::<bool>("CKOOL_OVERWRITE")? {
            self.overwrite = overwrite;
        }
        if let Some(limit) = parse_env::<u64>("CKOOL_API_UPLOAD_LIMIT")? {
            self.api_upload_limit = limit;
        }
        if let Some(n) = parse_env::<usize>("CKOOL_MAX_THREAD_WORKERS")? {
            self.max_thread_workers = Some(n);
        }
        if let Some(n) = parse_env::<usize>("CKOOL_MAX_PROCESS_WORKERS")? {
            self.max_process_workers = Some(n);
        }
        if let Ok(pattern) = std::env::var("CKOOL_INCLUDE") {
            self.include_pattern = Some(pattern);
        }
        if let Ok(pattern) = std::env::var("CKOOL_EXCLUDE") {
            self.exclude_pattern = Some(pattern);
        }
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tmp_dir_name.is_empty()
            || self.tmp_dir_name.contains('/')
            || self.tmp_dir_name.contains('\\')
        {
            return Err(PipelineError::config(format!(
                "tmp_dir_name must be a single path component, got '{}'",
                self.tmp_dir_name
            )));
        }
        if self.block_size == 0 {
            return Err(PipelineError::config("block_size must be greater than zero"));
        }
        if self.max_thread_workers == Some(0) || self.max_process_workers == Some(0) {
            return Err(PipelineError::config("worker caps must be greater than zero"));
        }
        for pattern in [&self.include_pattern, &self.exclude_pattern]
            .into_iter()
            .flatten()
        {
            regex::Regex::new(pattern).map_err(|source| PipelineError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PipelineError::config(format!("invalid value for {}: '{}'", key, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "CKOOL_TMP_DIR",
        "CKOOL_HASH",
        "CKOOL_COMPRESSION",
        "CKOOL_BLOCK_SIZE",
        "CKOOL_POLL_INTERVAL_MS",
        "CKOOL_OVERWRITE",
        "CKOOL_API_UPLOAD_LIMIT",
        "CKOOL_MAX_THREAD_WORKERS",
        "CKOOL_MAX_PROCESS_WORKERS",
        "CKOOL_INCLUDE",
        "CKOOL_EXCLUDE",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.tmp_dir_name, ".ckool");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.compression, CompressionFormat::Zip);
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(!config.overwrite);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("CKOOL_HASH", "md5");
        std::env::set_var("CKOOL_COMPRESSION", "tar.xz");
        std::env::set_var("CKOOL_OVERWRITE", "true");
        std::env::set_var("CKOOL_MAX_PROCESS_WORKERS", "2");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(config.compression, CompressionFormat::TarXz);
        assert!(config.overwrite);
        assert_eq!(config.max_process_workers, Some(2));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        std::env::set_var("CKOOL_BLOCK_SIZE", "lots");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(PipelineError::Config(_))
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_toml_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hash_algorithm = \"sha512\"\ncompression = \"tar.gz\"\nexclude_pattern = \"\\\\.log$\""
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.compression, CompressionFormat::TarGz);
        assert_eq!(config.exclude_pattern.as_deref(), Some("\\.log$"));
        assert_eq!(config.tmp_dir_name, DEFAULT_TMP_DIR_NAME);
    }

    #[test]
    fn test_validate() {
        let mut config = PipelineConfig {
            tmp_dir_name: "a/b".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.tmp_dir_name = ".ckool".into();
        config.block_size = 0;
        assert!(config.validate().is_err());

        config.block_size = 1;
        config.include_pattern = Some("([".into());
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidPattern { .. })
        ));
    }
}
