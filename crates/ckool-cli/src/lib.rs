//! ckool CLI Library
//!
//! Command-line front end for preparing data packages for a CKAN repository.
//!
//! # Overview
//!
//! - **Planning**: list what a package directory will publish (`ckool plan`)
//! - **Preparation**: archive directories and hash every resource (`ckool prepare`)
//! - **Publishing**: prepare, then upload every resource (`ckool publish`)

pub mod commands;
pub mod config;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use error::{CliError, Result};

use std::path::PathBuf;

use ckool_common::{CompressionFormat, HashAlgorithm};
use clap::{Parser, Subcommand};

/// ckool - prepare and publish CKAN data packages
#[derive(Parser, Debug)]
#[command(name = "ckool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML configuration file (environment variables still apply on top)
    #[arg(short, long, env = "CKOOL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Only include paths matching this regular expression
    #[arg(long, global = true)]
    pub include: Option<String>,

    /// Exclude paths matching this regular expression (wins over --include)
    #[arg(long, global = true)]
    pub exclude: Option<String>,

    /// Hash algorithm: md5, sha1, sha224, sha256, sha512
    #[arg(long, global = true)]
    pub hash: Option<HashAlgorithm>,

    /// Archive format for directories: zip, tar.gz, tar.xz, tar.bz2
    #[arg(long, global = true)]
    pub compression: Option<CompressionFormat>,

    /// Recompute archives and hashes even when cached results exist
    #[arg(long, global = true)]
    pub overwrite: bool,

    /// Print the CLI reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the resources a package directory would produce
    Plan {
        /// Package directory
        #[arg(default_value = ".")]
        root: PathBuf,
    },

    /// Archive directories and hash every resource
    Prepare {
        /// Package directory
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Print the cache records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Prepare, then upload every resource
    Publish {
        /// Package directory
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Mirror resources into this directory instead of a remote repository
        #[arg(long)]
        mirror: PathBuf,
    },
}
