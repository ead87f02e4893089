#![cfg(unix)]
//! End-to-end runs of the driver against a scripted dd, checked through
//! the same `/metrics` output a scraper would see.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ddmetrics::{
    BenchmarkRunner, DdCommand, DdMetrics, Driver, DriverConfig, DriverState, FilePolicy,
    RunnerConfig, Trial, TrialOutcome, http_api,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Fake dd that answers per block size, and actually creates the output
/// file so naming policies can be observed on disk.
const SCRIPTED_DD: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    of=*) out="${arg#of=}" ;;
    bs=*) bs="${arg#bs=}" ;;
  esac
done
: > "$out"
case "$bs" in
  1G)  echo "1073741824 bytes (1.1 GB) copied, 2.5 s, 400 MB/s" >&2 ;;
  64M) echo "67108864 bytes (67 MB, 64 MiB) copied, 0.05 s, 1.2 GB/s" >&2 ;;
  1M)  echo "268435456 bytes copied at 142.5 MB/s" >&2 ;;
  8k)  echo "dd: error writing: No space left on device" >&2; exit 1 ;;
  *)   echo "done" ;;
esac
"#;

fn scripted_runner(
    dir: &TempDir,
    write_dir: &Path,
    policy: FilePolicy,
) -> (BenchmarkRunner, Arc<DdMetrics>) {
    let script = dir.path().join("dd.sh");
    std::fs::write(&script, SCRIPTED_DD).unwrap();
    let metrics = Arc::new(DdMetrics::new("it").unwrap());
    let config = RunnerConfig::new(write_dir)
        .with_file_policy(policy)
        .with_command(DdCommand {
            program: "sh".to_string(),
            leading_args: vec![script.to_string_lossy().into_owned()],
        });
    (BenchmarkRunner::new(config, metrics.clone()), metrics)
}

fn config(loop_count: u32) -> DriverConfig {
    DriverConfig {
        startup_delay: Duration::ZERO,
        loop_count,
        ..DriverConfig::default()
    }
}

async fn scrape(metrics: Arc<DdMetrics>) -> String {
    let response = http_api::create_router(metrics)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_full_matrix_two_passes() {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (runner, metrics) = scripted_runner(&dir, data.path(), FilePolicy::Unique);
    let driver = Driver::new(config(2), Arc::new(runner));

    let summary = driver.run(CancellationToken::new()).await;

    assert_eq!(summary.passes_completed, 2);
    assert_eq!(summary.trials_run, 10);
    assert_eq!(summary.ok, 6);
    assert_eq!(summary.err, 4);
    assert_eq!(summary.timeout, 0);

    // 1G: MB/s with duration.
    assert_eq!(metrics.throughput_sum("1G", "1"), Some(800.0));
    assert_eq!(metrics.duration_sum("1G", "1"), Some(5.0));
    // 64M: GB/s normalized to MB/s.
    let gb = metrics.throughput_sum("64M", "1").unwrap();
    assert!((gb - 2400.0).abs() < 1e-6);
    assert_eq!(metrics.duration_sum("64M", "1"), Some(0.1));
    // 1M: throughput without duration.
    assert_eq!(metrics.throughput_sum("1M", "256"), Some(285.0));
    assert_eq!(metrics.duration_sum("1M", "256"), None);
    // 8k: non-zero exit; 512: no report.
    assert_eq!(metrics.writes("8k", "10k", TrialOutcome::Err), 2.0);
    assert_eq!(metrics.writes("512", "1000", TrialOutcome::Err), 2.0);
    assert_eq!(metrics.throughput_sum("512", "1000"), None);

    let body = scrape(metrics).await;
    assert!(body.contains("dd_writes_total_v2{bs=\"1G\",count=\"1\",result=\"ok\"} 2"));
    assert!(body.contains("dd_writes_total_v2{bs=\"8k\",count=\"10k\",result=\"err\"} 2"));
    assert!(body.contains("dd_writes_throughput_MBs_v2{bs=\"1G\",count=\"1\"} 800"));
    assert!(body.contains("dd_writes_duration_seconds_v2{bs=\"1G\",count=\"1\"} 5"));
    assert!(!body.contains("result=\"timeout\""));

    // Unique naming: one file per trial.
    assert_eq!(std::fs::read_dir(data.path()).unwrap().count(), 10);
}

#[tokio::test]
async fn test_reuse_policy_keeps_one_file() {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (runner, _metrics) = scripted_runner(&dir, data.path(), FilePolicy::Reuse);
    let driver = Driver::new(config(3), Arc::new(runner));

    let summary = driver.run(CancellationToken::new()).await;
    assert_eq!(summary.trials_run, 15);

    let files: Vec<_> = std::fs::read_dir(data.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from("test_file.tmp")]);
}

#[tokio::test]
async fn test_every_trial_counted_once() {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let (runner, metrics) = scripted_runner(&dir, data.path(), FilePolicy::Unique);
    let trials = vec![Trial::new("1G", "1"), Trial::new("8k", "10k"), Trial::new("7", "7")];
    let driver = Driver::new(
        DriverConfig {
            trials: trials.clone(),
            ..config(4)
        },
        Arc::new(runner),
    );

    driver.run(CancellationToken::new()).await;

    for trial in &trials {
        let total: f64 = [TrialOutcome::Ok, TrialOutcome::Err, TrialOutcome::Timeout]
            .iter()
            .map(|o| metrics.writes(&trial.bs, &trial.count, *o))
            .sum();
        assert_eq!(total, 4.0, "{}", trial);
    }
}

#[tokio::test]
async fn test_timeouts_do_not_stop_the_loop() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("slow.sh");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    let metrics = Arc::new(DdMetrics::new("it").unwrap());
    let runner = BenchmarkRunner::new(
        RunnerConfig::new(dir.path())
            .with_timeout(Duration::from_millis(150))
            .with_command(DdCommand {
                program: "sh".to_string(),
                leading_args: vec![script.to_string_lossy().into_owned()],
            }),
        metrics.clone(),
    );
    let driver = Driver::new(
        DriverConfig {
            trials: vec![Trial::new("1G", "1"), Trial::new("64M", "1")],
            ..config(2)
        },
        Arc::new(runner),
    );
    let state = driver.state();

    let summary = driver.run(CancellationToken::new()).await;

    assert_eq!(summary.timeout, 4);
    assert_eq!(*state.borrow(), DriverState::Finished);
    assert_eq!(metrics.writes("64M", "1", TrialOutcome::Timeout), 2.0);
    assert_eq!(metrics.throughput_sum("1G", "1"), None);
    assert_eq!(metrics.duration_sum("1G", "1"), None);
}
