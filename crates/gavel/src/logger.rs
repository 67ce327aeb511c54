//! Judge logging
//!
//! Every stage transition and sandbox termination is recorded through an
//! append-only sink keyed by submission id, with syslog-style severities.
//! The sink must never block or abort judging: a write failure downgrades
//! to a `tracing` warning and the pipeline carries on. Records are always
//! mirrored into `tracing` so operators get one coherent stream.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Longest message the sink will write; anything beyond is cut so a single
/// runaway diagnostic cannot bloat the log store.
const MAX_MESSAGE_BYTES: usize = 2048;

/// Syslog-style severity. Lower numeric value means higher severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Unrecoverable or configuration failures
    Err,

    /// Verdict decisions
    Notice,

    /// Stage start/stop
    #[default]
    Info,

    /// Resource-usage samples and other diagnostics
    Debug,
}

impl LogLevel {
    /// Numeric severity: ERR=3, NOTICE=5, INFO=6, DEBUG=7
    pub fn severity(self) -> u8 {
        match self {
            LogLevel::Err => 3,
            LogLevel::Notice => 5,
            LogLevel::Info => 6,
            LogLevel::Debug => 7,
        }
    }

    /// Fixed-width label used in log lines
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Err => "ERR",
            LogLevel::Notice => "NOTICE",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Check whether a record at this level passes the given threshold
    pub fn passes(self, threshold: LogLevel) -> bool {
        self.severity() <= threshold.severity()
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Append-only judge log.
///
/// Cheap to clone; workers share nothing but the target path. Each record
/// is one `O_APPEND` write, so concurrent workers interleave whole lines
/// without any in-process locking.
#[derive(Debug, Clone)]
pub struct JudgeLog {
    file: Option<PathBuf>,
    threshold: LogLevel,
}

impl JudgeLog {
    /// Create a log writing to `judge.log` under `log_dir`.
    ///
    /// With no directory the sink is tracing-only. Directory creation is
    /// best-effort here; a missing directory surfaces per record as the
    /// fallback path, never as a judging failure.
    pub fn new(log_dir: Option<&Path>, threshold: LogLevel) -> Self {
        let file = log_dir.map(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "could not create log directory");
            }
            dir.join("judge.log")
        });
        Self { file, threshold }
    }

    /// A tracing-only log, used by tests and library embedders
    pub fn disabled() -> Self {
        Self {
            file: None,
            threshold: LogLevel::Debug,
        }
    }

    /// Record one event for a submission at the given stage
    pub fn record(&self, level: LogLevel, stage: &str, submission: &str, message: &str) {
        if !level.passes(self.threshold) {
            return;
        }

        let message = truncate_utf8(message, MAX_MESSAGE_BYTES);

        match level {
            LogLevel::Err => tracing::error!(stage, submission, "{message}"),
            LogLevel::Notice | LogLevel::Info => tracing::info!(stage, submission, "{message}"),
            LogLevel::Debug => tracing::debug!(stage, submission, "{message}"),
        }

        if let Some(ref path) = self.file {
            let line = format!(
                "[{}] {:<6} {} {}: {}\n",
                unix_timestamp(),
                level.label(),
                stage,
                submission,
                message
            );
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| f.write_all(line.as_bytes()));
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "judge log sink unavailable");
            }
        }
    }

    pub fn err(&self, stage: &str, submission: &str, message: &str) {
        self.record(LogLevel::Err, stage, submission, message);
    }

    pub fn notice(&self, stage: &str, submission: &str, message: &str) {
        self.record(LogLevel::Notice, stage, submission, message);
    }

    pub fn info(&self, stage: &str, submission: &str, message: &str) {
        self.record(LogLevel::Info, stage, submission, message);
    }

    pub fn debug(&self, stage: &str, submission: &str, message: &str) {
        self.record(LogLevel::Debug, stage, submission, message);
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Cut a string at a byte budget without splitting a UTF-8 sequence
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
