//! Checksum utilities for file verification
//!
//! Every digest is computed by streaming the input in fixed-size blocks, so
//! multi-gigabyte resources never have to fit in memory.

use crate::error::{CkoolError, Result};
use crate::types::HashAlgorithm;
use sha2::{Digest, Sha224, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Default read block size (64 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Incremental hasher over any supported algorithm
pub enum StreamHasher {
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => StreamHasher::Md5(md5::Context::new()),
            HashAlgorithm::Sha1 => StreamHasher::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha224 => StreamHasher::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => StreamHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => StreamHasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Md5(ctx) => ctx.consume(data),
            StreamHasher::Sha1(h) => h.update(data),
            StreamHasher::Sha224(h) => h.update(data),
            StreamHasher::Sha256(h) => h.update(data),
            StreamHasher::Sha512(h) => h.update(data),
        }
    }

    /// Consume the hasher and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            StreamHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamHasher::Sha224(h) => hex::encode(h.finalize()),
            StreamHasher::Sha256(h) => hex::encode(h.finalize()),
            StreamHasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute checksum of in-memory bytes
pub fn compute_bytes_checksum(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    block_size: usize,
) -> Result<String> {
    compute_checksum_with_progress(reader, algorithm, block_size, |_| {})
}

/// Compute checksum, reporting the size of every block read to `on_block`
pub fn compute_checksum_with_progress<R, F>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    block_size: usize,
    mut on_block: F,
) -> Result<String>
where
    R: Read,
    F: FnMut(u64),
{
    let mut hasher = StreamHasher::new(algorithm);
    let mut buffer = vec![0u8; block_size.max(1)];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..bytes_read]);
        on_block(bytes_read as u64);
    }

    Ok(hasher.finalize_hex())
}

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: HashAlgorithm,
    block_size: usize,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm, block_size)
}

/// Verify checksum for a file (hex comparison is case-insensitive)
pub fn verify_file_checksum(
    path: impl AsRef<Path>,
    expected: &str,
    algorithm: HashAlgorithm,
) -> Result<()> {
    let actual = compute_file_checksum(path, algorithm, DEFAULT_BLOCK_SIZE)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CkoolError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
