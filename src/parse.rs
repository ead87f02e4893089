//! Parsing of the `dd` transfer report.
//!
//! GNU dd ends its run with a line such as:
//!
//! ```text
//! 1073741824 bytes (1.1 GB, 1.0 GiB) copied, 2.5 s, 400 MB/s
//! ```
//!
//! Only three patterns are recognized:
//! - `<n> MB/s`: throughput, used as megabytes per second
//! - `<n> GB/s`: throughput, converted to megabytes per second (x1000)
//! - `<n> s,`: elapsed seconds
//!
//! A report without either throughput form is unparseable, regardless of
//! whether a duration is present.

use std::sync::LazyLock;

use regex::Regex;

/// Megabytes per gigabyte (decimal units, as dd reports them).
pub const MB_PER_GB: f64 = 1000.0;

// A number must not be glued to a preceding digit, dot, sign or exponent
// marker, so `%g` output such as `5e-05 s,` yields nothing.
static THROUGHPUT_MB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9.eE+\-])([0-9]*\.[0-9]+|[0-9]+) MB/s").expect("valid regex")
});
static THROUGHPUT_GB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9.eE+\-])([0-9]*\.[0-9]+|[0-9]+) GB/s").expect("valid regex")
});
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9.eE+\-])([0-9]*\.[0-9]+|[0-9]+) s,").expect("valid regex")
});

/// Unit the throughput figure was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughputUnit {
    MegabytesPerSec,
    GigabytesPerSec,
}

/// Measurement extracted from one dd report.
///
/// Throughput is always present; a report without one does not produce a
/// `DdReport` at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DdReport {
    /// Throughput in MB/s after unit normalization.
    pub throughput_mbps: f64,
    /// Unit the throughput appeared in.
    pub unit: ThroughputUnit,
    /// Elapsed seconds, when the report carries them.
    pub duration_secs: Option<f64>,
}

/// Parse a dd report. Returns `None` when no throughput figure is found.
pub fn parse_report(output: &str) -> Option<DdReport> {
    let (throughput_mbps, unit) = parse_throughput(output)?;
    Some(DdReport {
        throughput_mbps,
        unit,
        duration_secs: parse_duration(output),
    })
}

/// Find the throughput figure, preferring MB/s over GB/s.
pub fn parse_throughput(output: &str) -> Option<(f64, ThroughputUnit)> {
    if let Some(mb) = first_number(&THROUGHPUT_MB_RE, output) {
        return Some((mb, ThroughputUnit::MegabytesPerSec));
    }
    first_number(&THROUGHPUT_GB_RE, output)
        .map(|gb| (gb * MB_PER_GB, ThroughputUnit::GigabytesPerSec))
}

/// Find the elapsed-seconds figure.
pub fn parse_duration(output: &str) -> Option<f64> {
    first_number(&DURATION_RE, output)
}

fn first_number(re: &Regex, output: &str) -> Option<f64> {
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
