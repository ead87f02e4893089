//! Execution of a single dd write trial.
//!
//! A trial launches the write command under a hard deadline, classifies the
//! result, and records it:
//! - **timeout**: the deadline passed; the child is killed, nothing is parsed
//! - **err**: the command could not start, exited non-zero, or printed no
//!   recognizable throughput figure
//! - **ok**: throughput (and duration, when reported) was parsed and added
//!   to the running sums
//!
//! Every completed trial increments `dd_writes_total_v2` exactly once.
//! Failures are absorbed here; only cancellation surfaces as an error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::DdMetrics;
use crate::parse::{DdReport, parse_report};
use crate::temp_path::FilePolicy;

/// Hard wall-clock limit for one dd invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Default write program.
pub const DEFAULT_DD_PROGRAM: &str = "dd";

/// Maximum number of output bytes echoed into a failure message.
const OUTPUT_EXCERPT_LEN: usize = 512;

/// One (block size, count) pair, passed verbatim to dd.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Trial {
    pub bs: String,
    pub count: String,
}

impl Trial {
    pub fn new(bs: impl Into<String>, count: impl Into<String>) -> Self {
        Self {
            bs: bs.into(),
            count: count.into(),
        }
    }
}

impl std::fmt::Display for Trial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bs={} count={}", self.bs, self.count)
    }
}

/// Classified result of a trial; also the `result` label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialOutcome {
    Ok,
    Err,
    Timeout,
}

impl TrialOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Err => "err",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Why a trial did not produce a measurement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrialFailure {
    #[error("failed to launch {program}: {reason}")]
    Launch { program: String, reason: String },

    #[error("command exited with {status}: {output}")]
    ExitStatus { status: String, output: String },

    #[error("unable to parse dd output: {0}")]
    Unparseable(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

impl TrialFailure {
    /// Outcome label this failure is counted under.
    pub fn outcome(&self) -> TrialOutcome {
        match self {
            Self::Timeout(_) => TrialOutcome::Timeout,
            Self::Launch { .. } | Self::ExitStatus { .. } | Self::Unparseable(_) => {
                TrialOutcome::Err
            }
        }
    }
}

/// Errors that abort a trial without recording it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("trial cancelled")]
    Cancelled,
}

/// Everything known about a finished trial.
#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub trial: Trial,
    pub outcome: TrialOutcome,
    /// Present exactly when `outcome` is `Ok`.
    pub report: Option<DdReport>,
    /// Present exactly when `outcome` is not `Ok`.
    pub failure: Option<TrialFailure>,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

/// Program used to perform the write, plus arguments placed before the
/// trial arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl Default for DdCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_DD_PROGRAM.to_string(),
            leading_args: Vec::new(),
        }
    }
}

impl DdCommand {
    /// Full argument list for writing `trial` to `output_path`.
    ///
    /// `conv=fsync` makes dd flush to stable storage before exiting, so the
    /// reported time covers the durable write.
    pub fn args(&self, trial: &Trial, output_path: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("if=/dev/zero".to_string());
        args.push(format!("of={}", output_path.display()));
        args.push(format!("bs={}", trial.bs));
        args.push(format!("count={}", trial.count));
        args.push("conv=fsync".to_string());
        args
    }
}

/// Settings shared by every trial.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory the output files are written into.
    pub write_dir: PathBuf,
    pub file_policy: FilePolicy,
    pub command: DdCommand,
    pub timeout: Duration,
}

impl RunnerConfig {
    pub fn new(write_dir: impl Into<PathBuf>) -> Self {
        Self {
            write_dir: write_dir.into(),
            file_policy: FilePolicy::default(),
            command: DdCommand::default(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_file_policy(mut self, policy: FilePolicy) -> Self {
        self.file_policy = policy;
        self
    }

    pub fn with_command(mut self, command: DdCommand) -> Self {
        self.command = command;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs trials and records them into a metrics instance.
pub struct BenchmarkRunner {
    config: RunnerConfig,
    metrics: Arc<DdMetrics>,
}

enum Execution {
    Finished(std::process::Output),
    LaunchFailed(std::io::Error),
    TimedOut,
}

impl BenchmarkRunner {
    pub fn new(config: RunnerConfig, metrics: Arc<DdMetrics>) -> Self {
        Self { config, metrics }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execute one trial and record its outcome.
    ///
    /// Returns `Err(RunnerError::Cancelled)` if `cancel` fires while the
    /// command is running; the child is killed and nothing is recorded.
    pub async fn run_trial(
        &self,
        trial: &Trial,
        cancel: &CancellationToken,
    ) -> Result<TrialRecord, RunnerError> {
        let output_path = self.config.file_policy.output_path(&self.config.write_dir);
        let args = self.config.command.args(trial, &output_path);
        debug!(
            program = %self.config.command.program,
            args = ?args,
            "Launching write command"
        );

        let started = Instant::now();
        let execution = self.execute(&args, cancel).await?;
        let elapsed = started.elapsed();

        let result = match execution {
            Execution::TimedOut => Err(TrialFailure::Timeout(self.config.timeout)),
            Execution::LaunchFailed(e) => Err(TrialFailure::Launch {
                program: self.config.command.program.clone(),
                reason: e.to_string(),
            }),
            Execution::Finished(output) => classify_output(&output),
        };

        Ok(self.record(trial, result, output_path, elapsed))
    }

    async fn execute(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Execution, RunnerError> {
        let child = Command::new(&self.config.command.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return Ok(Execution::LaunchFailed(e)),
        };

        // Dropping the wait future drops the child, which kills it.
        tokio::select! {
            result = tokio::time::timeout(self.config.timeout, child.wait_with_output()) => {
                match result {
                    Ok(Ok(output)) => Ok(Execution::Finished(output)),
                    Ok(Err(e)) => Ok(Execution::LaunchFailed(e)),
                    Err(_) => Ok(Execution::TimedOut),
                }
            }
            _ = cancel.cancelled() => {
                debug!("Write command cancelled, killing child");
                Err(RunnerError::Cancelled)
            }
        }
    }

    fn record(
        &self,
        trial: &Trial,
        result: Result<DdReport, TrialFailure>,
        output_path: PathBuf,
        elapsed: Duration,
    ) -> TrialRecord {
        let (bs, count) = (trial.bs.as_str(), trial.count.as_str());

        match result {
            Ok(report) => {
                if let Some(secs) = report.duration_secs {
                    self.metrics.add_duration(bs, count, secs);
                }
                self.metrics.add_throughput(bs, count, report.throughput_mbps);
                self.metrics.inc_write(bs, count, TrialOutcome::Ok);
                info!(
                    bs,
                    count,
                    throughput_mbps = report.throughput_mbps,
                    duration_secs = ?report.duration_secs,
                    "Wrote bs={} count={}",
                    bs,
                    count
                );
                TrialRecord {
                    trial: trial.clone(),
                    outcome: TrialOutcome::Ok,
                    report: Some(report),
                    failure: None,
                    output_path,
                    elapsed,
                }
            }
            Err(failure) => {
                let outcome = failure.outcome();
                self.metrics.inc_write(bs, count, outcome);
                warn!(bs, count, %outcome, "Write trial failed: {}", failure);
                TrialRecord {
                    trial: trial.clone(),
                    outcome,
                    report: None,
                    failure: Some(failure),
                    output_path,
                    elapsed,
                }
            }
        }
    }
}

/// Classify a finished command from its exit status and report text.
pub fn classify_output(output: &std::process::Output) -> Result<DdReport, TrialFailure> {
    let text = combined_output(output);
    debug!(output = %text, "Write command finished");

    if !output.status.success() {
        return Err(TrialFailure::ExitStatus {
            status: output.status.to_string(),
            output: excerpt(&text),
        });
    }

    parse_report(&text).ok_or_else(|| TrialFailure::Unparseable(excerpt(&text)))
}

/// Stdout followed by stderr. dd writes its report to stderr.
fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(OUTPUT_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
