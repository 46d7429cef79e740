//! ckool package pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Prepares a local package directory for publication on a CKAN repository
//! and drives the preparation through a dependency-aware job scheduler.
//!
//! # Overview
//!
//! - [`planner`]: classifies the package root's entries into work items
//! - [`preparer`]: archives directories, hashes files, consults [`cache`]
//! - [`graph`]: declares which job function feeds which and how they run
//! - [`scheduler`]: executes a [`graph::JobGraph`] on thread and CPU workers
//! - [`upload`]: picks API or SCP upload per resource and calls a backend
//! - [`stages`]: wires all of the above into the compress → hash → upload
//!   package pipeline
//!
//! # Example
//!
//! ```no_run
//! use ckool_pipeline::{config::PipelineConfig, stages::PackagePipeline};
//!
//! let config = PipelineConfig::from_env()?;
//! let summary = PackagePipeline::new(config).run("/data/my-package")?;
//! println!("{} resources prepared", summary.outputs.len());
//! # Ok::<(), ckool_pipeline::PipelineError>(())
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod job;
pub mod planner;
pub mod preparer;
pub mod progress;
pub mod scheduler;
pub mod stages;
pub mod upload;

// Re-export commonly used types
pub use cache::{CacheRecord, ContentCache};
pub use error::{AggregateError, PipelineError, Result};
pub use graph::{JobGraph, JobGraphBuilder};
pub use job::{ConcurrencyClass, FunctionId, JobDescriptor, JobInput, ReturnPayload};
pub use planner::{plan, WorkItem, WorkKind};
pub use scheduler::{run_graph, RunSummary, Scheduler, SchedulerConfig};
