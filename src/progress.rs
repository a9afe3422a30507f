//! Ingestion progress reporting.
//!
//! The coordinator hands a stats snapshot to a [`ProgressReporter`] after
//! every processed release (and after every failed window). Reporters run
//! synchronously on the ingestion task, so a slow reporter slows the run.
//! CLI reporters write to **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::ingest::IngestionStats;

/// Observer for ingestion progress. The only event is "stats changed".
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stats: &IngestionStats);
}

/// Plain closures are reporters.
impl<F> ProgressReporter for F
where
    F: Fn(&IngestionStats) + Send + Sync,
{
    fn report(&self, stats: &IngestionStats) {
        self(stats)
    }
}

/// Human-friendly progress on stderr: "sync  processed 1,234  ok 1,200  failed 34".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, stats: &IngestionStats) {
        let line = format!(
            "sync  processed {}  ok {}  failed {}\n",
            format_number(stats.total_processed),
            format_number(stats.total_successful),
            format_number(stats.total_failed),
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, stats: &IngestionStats) {
        let obj = serde_json::json!({
            "event": "progress",
            "processed": stats.total_processed,
            "successful": stats.total_successful,
            "failed": stats.total_failed,
            "errors": stats.errors.len(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _stats: &IngestionStats) {}
}

/// Thousands-grouped count: `1234567` → `"1,234,567"`.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.char_indices() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Which reporter `compras sync` and `compras recent` attach.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: '{}'. Must be off, human, or json.", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn counts_are_grouped_by_thousands() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(950), "950");
        assert_eq!(format_number(48_120), "48,120");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn closures_are_reporters() {
        let seen = AtomicU64::new(0);
        let reporter = |stats: &IngestionStats| {
            seen.store(stats.total_processed, Ordering::SeqCst);
        };
        let mut stats = IngestionStats::start();
        stats.total_processed = 7;
        reporter.report(&stats);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
