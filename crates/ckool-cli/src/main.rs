//! ckool CLI - Main entry point

use ckool_cli::{Cli, Commands};
use ckool_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    if cli.command.is_none() {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    }

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("ckool")
        .build();

    // Environment variables take precedence over the defaults above
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(&cli) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

/// Execute the CLI command
fn execute_command(cli: &Cli) -> ckool_cli::Result<()> {
    let Some(ref command) = cli.command else {
        unreachable!("Command should have been validated in main");
    };

    let config = ckool_cli::config::resolve(cli)?;

    match command {
        Commands::Plan { root } => ckool_cli::commands::plan::run(config, root),
        Commands::Prepare { root, json } => {
            ckool_cli::commands::prepare::run(config, root, *json)
        }
        Commands::Publish { root, mirror } => {
            ckool_cli::commands::publish::run(config, root, mirror)
        }
    }
}
