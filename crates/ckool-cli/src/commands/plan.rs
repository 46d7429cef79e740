//! `ckool plan` command implementation
//!
//! Lists the resources a package directory would produce without touching it.

use std::path::Path;

use ckool_pipeline::config::PipelineConfig;
use ckool_pipeline::stages::PackagePipeline;
use ckool_pipeline::WorkKind;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use crate::error::Result;
use crate::progress::format_bytes;

pub fn run(config: PipelineConfig, root: &Path) -> Result<()> {
    let compression = config.compression;
    let items = PackagePipeline::new(config).plan(root)?;

    if items.is_empty() {
        println!("Nothing to publish in '{}'.", root.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Name", "Kind", "Size", "Resource"]);

    for item in &items {
        let name = item.name();
        let (kind, size, resource) = match item.kind {
            WorkKind::File => {
                let size = std::fs::metadata(&item.path)?.len();
                ("file", format_bytes(size), name.clone())
            }
            WorkKind::Directory => ("directory", "-".to_string(), compression.archive_name(&name)),
        };
        table.add_row(vec![name, kind.to_string(), size, resource]);
    }

    println!("{}", table);
    println!(
        "{} {} resource(s) planned",
        "✓".green(),
        items.len().to_string().bold()
    );
    Ok(())
}
