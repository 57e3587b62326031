//! scraperbox: isolated build-and-run pipeline for untrusted scraper code.
//!
//! Builds a scraper repository into a layered container image (base image →
//! configuration → compile → application code) and runs it under fixed
//! resource caps, streaming log and address events to the caller and
//! returning extracted output files plus execution metrics.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod fscopy;
pub mod pipeline;
pub mod timing;

pub use config::RunnerConfig;
pub use error::RunnerError;
pub use events::{RunEvents, StreamKind};
pub use execution::{DockerClient, Image};
pub use pipeline::{DockerRunner, RunOptions, RunResult, STATUS_BUILD_FAILED};
pub use timing::TimingMetrics;
