//! `ckool prepare` command implementation
//!
//! Archives directories and hashes every resource through the scheduler.

use std::path::Path;
use std::sync::Arc;

use ckool_pipeline::config::PipelineConfig;
use ckool_pipeline::stages::{hashed_records, PackagePipeline};
use ckool_pipeline::CacheRecord;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::error::Result;
use crate::progress::{format_bytes, BarProgress};

pub fn run(config: PipelineConfig, root: &Path, json: bool) -> Result<()> {
    let progress = if json {
        BarProgress::hidden()
    } else {
        BarProgress::new()
    };

    let pipeline = PackagePipeline::new(config).with_progress(Arc::new(progress.clone()));
    let summary = match pipeline.run(root) {
        Ok(summary) => summary,
        Err(e) => {
            progress.clear();
            return Err(e.into());
        }
    };
    progress.finish("prepared");

    let mut records = hashed_records(&summary)?;
    records.sort_by(|a, b| a.file.cmp(&b.file));

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("{}", records_table(&records));
    println!(
        "{} {} resource(s) prepared in {:.1}s",
        "✓".green(),
        records.len().to_string().bold(),
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

pub(crate) fn records_table(records: &[CacheRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Resource", "Size", "Algorithm", "Hash"]);

    for record in records {
        table.add_row(vec![
            record.name(),
            format_bytes(record.size),
            record.hash_type.to_string(),
            record.hash.clone(),
        ]);
    }
    table
}
