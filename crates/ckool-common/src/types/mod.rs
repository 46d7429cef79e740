//! Common types used across ckool

use serde::{Deserialize, Serialize};

use crate::error::CkoolError;

/// Digest algorithm used to fingerprint package resources.
///
/// The lowercase names are what CKAN stores in a resource's `hash_type`
/// field, so they double as the on-disk cache representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded digest
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = CkoolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha224" => Ok(HashAlgorithm::Sha224),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(CkoolError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Archive format used when a package directory must be packed before upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CompressionFormat {
    #[default]
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
    #[serde(rename = "tar.xz")]
    TarXz,
    #[serde(rename = "tar.bz2")]
    TarBz2,
}

impl CompressionFormat {
    /// File extension without the leading dot (`zip`, `tar.gz`, ...)
    pub fn extension(self) -> &'static str {
        match self {
            CompressionFormat::Zip => "zip",
            CompressionFormat::TarGz => "tar.gz",
            CompressionFormat::TarXz => "tar.xz",
            CompressionFormat::TarBz2 => "tar.bz2",
        }
    }

    /// Archive file name for a directory called `stem`
    pub fn archive_name(self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension())
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for CompressionFormat {
    type Err = CkoolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "zip" => Ok(CompressionFormat::Zip),
            "tar.gz" | "tgz" | "gz" | "gzip" => Ok(CompressionFormat::TarGz),
            "tar.xz" | "txz" | "xz" => Ok(CompressionFormat::TarXz),
            "tar.bz2" | "tbz2" | "bz2" | "bzip2" => Ok(CompressionFormat::TarBz2),
            other => Err(CkoolError::UnsupportedFormat(other.to_string())),
        }
    }
}
