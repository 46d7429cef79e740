//! Build automation tasks for ckool
//!
//! Currently this regenerates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for ckool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<ckool_cli::Cli>();

    let content = format!(
        r#"# ckool CLI Reference

This documentation is generated from the CLI source code.

## Overview

ckool prepares a package directory for a CKAN repository. Every direct child
of the package becomes one resource: files are hashed as they are, and
directories are archived first. Hashes are cached next to the package in
`.ckool/<resource>.json`, so reruns only redo what changed.

## Quick Start

```bash
# See what would be published
ckool plan ./my-package

# Archive and hash everything, printing the records as JSON
ckool prepare ./my-package --hash sha256 --compression tar.gz --json

# Prepare and mirror every resource into a directory
ckool publish ./my-package --mirror /srv/mirror
```

## Commands

{}

## Environment Variables

- `CKOOL_CONFIG` - TOML configuration file
- `CKOOL_TMP_DIR` - Name of the cache directory (default: `.ckool`)
- `CKOOL_HASH` - Hash algorithm (default: `sha256`)
- `CKOOL_COMPRESSION` - Archive format for directories (default: `zip`)
- `CKOOL_BLOCK_SIZE` - Read block size in bytes for hashing
- `CKOOL_POLL_INTERVAL_MS` - Scheduler poll interval (default: `100`)
- `CKOOL_OVERWRITE` - Ignore cached archives and hashes
- `CKOOL_API_UPLOAD_LIMIT` - Largest resource uploaded through the API, in bytes
- `CKOOL_MAX_THREAD_WORKERS` / `CKOOL_MAX_PROCESS_WORKERS` - Worker caps
- `CKOOL_INCLUDE` / `CKOOL_EXCLUDE` - Path filters (regular expressions)
- `CKOOL_LOG_LEVEL`, `CKOOL_LOG_OUTPUT`, `CKOOL_LOG_FORMAT` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
