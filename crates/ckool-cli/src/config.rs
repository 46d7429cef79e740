//! Configuration resolution for the CLI
//!
//! Precedence, lowest first: built-in defaults, `--config` TOML file,
//! `CKOOL_*` environment variables, command-line flags.

use ckool_pipeline::config::PipelineConfig;

use crate::error::Result;
use crate::Cli;

/// Build the pipeline configuration for one invocation
pub fn resolve(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::from_env()?,
    };
    apply_flags(cli, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_flags(cli: &Cli, config: &mut PipelineConfig) {
    if let Some(pattern) = &cli.include {
        config.include_pattern = Some(pattern.clone());
    }
    if let Some(pattern) = &cli.exclude {
        config.exclude_pattern = Some(pattern.clone());
    }
    if let Some(hash) = cli.hash {
        config.hash_algorithm = hash;
    }
    if let Some(compression) = cli.compression {
        config.compression = compression;
    }
    if cli.overwrite {
        config.overwrite = true;
    }
}
