//! Background loop that sequences benchmark passes.
//!
//! After a startup delay (so the metrics endpoint is reachable before load
//! starts) the driver runs every trial of the matrix in order, for the
//! configured number of passes. Trials never overlap: concurrent writes to
//! the same disk would distort each other's throughput.
//!
//! The loop runs once and then stops; the process stays up so the
//! accumulated metrics remain scrapeable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::runner::{BenchmarkRunner, RunnerError, Trial, TrialOutcome};

/// Default wait before the first trial.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(20);

/// Default number of passes over the matrix.
pub const DEFAULT_LOOP_COUNT: u32 = 10;

/// Large sequential, medium sequential, small sequential-heavy, and two
/// small random-heavy writes.
pub fn default_trials() -> Vec<Trial> {
    vec![
        Trial::new("1G", "1"),
        Trial::new("64M", "1"),
        Trial::new("1M", "256"),
        Trial::new("8k", "10k"),
        Trial::new("512", "1000"),
    ]
}

/// Where the driver is. Passes and trials are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    NotStarted,
    Running { pass: u32, trial: usize },
    Finished,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub startup_delay: Duration,
    pub loop_count: u32,
    pub trials: Vec<Trial>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            startup_delay: DEFAULT_STARTUP_DELAY,
            loop_count: DEFAULT_LOOP_COUNT,
            trials: default_trials(),
        }
    }
}

/// Tally of one driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSummary {
    pub passes_completed: u32,
    pub trials_run: u64,
    pub ok: u64,
    pub err: u64,
    pub timeout: u64,
    pub cancelled: bool,
}

impl DriverSummary {
    fn count(&mut self, outcome: TrialOutcome) {
        self.trials_run += 1;
        match outcome {
            TrialOutcome::Ok => self.ok += 1,
            TrialOutcome::Err => self.err += 1,
            TrialOutcome::Timeout => self.timeout += 1,
        }
    }
}

pub struct Driver {
    config: DriverConfig,
    runner: Arc<BenchmarkRunner>,
    state_tx: watch::Sender<DriverState>,
}

impl Driver {
    pub fn new(config: DriverConfig, runner: Arc<BenchmarkRunner>) -> Self {
        let (state_tx, _) = watch::channel(DriverState::NotStarted);
        Self {
            config,
            runner,
            state_tx,
        }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<DriverState> {
        self.state_tx.subscribe()
    }

    /// Spawn the loop as a background task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<DriverSummary> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run every pass to completion, or until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> DriverSummary {
        let mut summary = DriverSummary::default();
        let write_dir = self.write_dir();

        debug!(
            delay_secs = self.config.startup_delay.as_secs_f64(),
            "Waiting before first write"
        );
        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = cancel.cancelled() => return self.cancelled(summary),
        }

        info!(
            passes = self.config.loop_count,
            trials = self.config.trials.len(),
            dir = %write_dir.display(),
            "Starting dd write benchmarks"
        );

        for pass in 1..=self.config.loop_count {
            for (idx, trial) in self.config.trials.iter().enumerate() {
                self.state_tx.send_replace(DriverState::Running {
                    pass,
                    trial: idx + 1,
                });

                match self.runner.run_trial(trial, &cancel).await {
                    Ok(record) => summary.count(record.outcome),
                    Err(RunnerError::Cancelled) => return self.cancelled(summary),
                }
            }
            summary.passes_completed = pass;
            debug!(pass, "Pass complete");
        }

        self.state_tx.send_replace(DriverState::Finished);
        info!(
            ok = summary.ok,
            err = summary.err,
            timeout = summary.timeout,
            "Done dding in the disk {}, will stay up so our metrics can be scraped.",
            write_dir.display()
        );
        summary
    }

    fn write_dir(&self) -> PathBuf {
        self.runner.config().write_dir.clone()
    }

    fn cancelled(&self, mut summary: DriverSummary) -> DriverSummary {
        summary.cancelled = true;
        self.state_tx.send_replace(DriverState::Cancelled);
        info!(
            passes_completed = summary.passes_completed,
            trials_run = summary.trials_run,
            "Benchmark loop cancelled"
        );
        summary
    }
}
