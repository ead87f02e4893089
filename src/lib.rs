//! Disk write throughput benchmarks exported as Prometheus metrics.
//!
//! A background driver repeatedly runs `dd` over a fixed matrix of
//! block-size/count pairs, parses each transfer report, and accumulates
//! the results into metric series served at `/metrics`.
//!
//! ## Modules
//!
//! - [`temp_path`]: output file naming (unique or reused)
//! - [`parse`]: dd report parsing (MB/s, GB/s, seconds)
//! - [`runner`]: one trial: launch, timeout, classify, record
//! - [`driver`]: startup delay and sequential passes over the matrix
//! - [`metrics`]: the registry and its series
//! - [`http_api`]: the `/metrics` endpoint
//! - [`config`]: flag/file/default layering
//! - [`logging`]: tracing setup

#![forbid(unsafe_code)]

pub mod config;
pub mod driver;
pub mod http_api;
pub mod logging;
pub mod metrics;
pub mod parse;
pub mod runner;
pub mod temp_path;

pub use config::{CliOverrides, ConfigError, FileConfig, Settings};
pub use driver::{Driver, DriverConfig, DriverState, DriverSummary};
pub use logging::{LogConfig, init_logging};
pub use metrics::DdMetrics;
pub use parse::{DdReport, ThroughputUnit, parse_report};
pub use runner::{
    BenchmarkRunner, DdCommand, RunnerConfig, RunnerError, Trial, TrialFailure, TrialOutcome,
    TrialRecord,
};
pub use temp_path::{FilePolicy, temp_file_name};
