//! ckool common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, checksum utilities, logging setup and error handling for the
//! ckool workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CkoolError`] and the crate [`Result`] alias
//! - **Checksums**: streaming digests over md5, sha1 and the sha2 family
//! - **Types**: hash algorithms and archive formats shared by every crate
//! - **Logging**: `tracing` subscriber bootstrap driven by environment
//!
//! # Example
//!
//! ```no_run
//! use ckool_common::checksum::{compute_file_checksum, DEFAULT_BLOCK_SIZE};
//! use ckool_common::types::HashAlgorithm;
//!
//! fn digest(path: &str) -> ckool_common::Result<String> {
//!     compute_file_checksum(path, HashAlgorithm::Sha256, DEFAULT_BLOCK_SIZE)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CkoolError, Result};
pub use types::{CompressionFormat, HashAlgorithm};
