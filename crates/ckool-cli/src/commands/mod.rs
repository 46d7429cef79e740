//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod plan;
pub mod prepare;
pub mod publish;
