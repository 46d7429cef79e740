//! `ckool publish` command implementation
//!
//! Runs the full compress → hash → upload graph. Resources are mirrored into
//! a local directory, which stands in for the remote repository.

use std::path::Path;
use std::sync::Arc;

use ckool_pipeline::config::PipelineConfig;
use ckool_pipeline::stages::{upload_receipts, PackagePipeline};
use ckool_pipeline::upload::DirectoryBackend;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::error::Result;
use crate::progress::BarProgress;

pub fn run(config: PipelineConfig, root: &Path, mirror: &Path) -> Result<()> {
    let progress = BarProgress::new();
    let pipeline = PackagePipeline::new(config)
        .with_progress(Arc::new(progress.clone()))
        .with_uploader(Arc::new(DirectoryBackend::new(mirror)));

    let summary = match pipeline.run(root) {
        Ok(summary) => summary,
        Err(e) => {
            progress.clear();
            return Err(e.into());
        }
    };
    progress.finish("published");

    let mut receipts = upload_receipts(&summary)?;
    receipts.sort_by(|a, b| a.name.cmp(&b.name));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Resource", "Id", "Status"]);
    for receipt in &receipts {
        table.add_row(vec![
            receipt.name.clone(),
            receipt.id.clone(),
            receipt.status.clone(),
        ]);
    }

    println!("{}", table);
    println!(
        "{} {} resource(s) published to {}",
        "✓".green(),
        receipts.len().to_string().bold(),
        mirror.display().to_string().cyan()
    );
    Ok(())
}
