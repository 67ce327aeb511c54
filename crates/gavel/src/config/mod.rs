use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, FileExtension, Language, RunConfig,
};
use crate::logger::LogLevel;
use crate::types::ResourceBudget;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../gavel.example.toml");

/// Memory given to compilers by default (512 MB). Toolchains routinely need
/// more than the solution memory limit.
const COMPILE_MEMORY_KB: u64 = 524_288;

/// Hard ceiling on compiler memory regardless of per-language overrides (2 GB)
const COMPILE_MEMORY_CEILING_KB: u64 = 2_097_152;

/// Processes allowed during compilation by default
const COMPILE_PROCESSES: u32 = 16;

/// File-size ceiling during compilation (64 MB). The artifact itself counts
/// against RLIMIT_FSIZE, so the run-stage output limit would break linking.
const COMPILE_OUTPUT_BYTES: u64 = 64 * 1024 * 1024;

/// Hard ceiling on sandboxed process counts regardless of overrides
const PROCESS_CEILING: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Immutable judging configuration.
///
/// Constructed once at process start and passed explicitly to every
/// component; nothing reads ambient global state. Limits are translated
/// into per-stage [`ResourceBudget`]s here so stages cannot exceed their
/// ceilings by construction.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory the intake drops new submissions into
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: PathBuf,

    /// Directory claimed submissions are moved to (the claim is the move)
    #[serde(default = "default_submit_dir")]
    pub submit_dir: PathBuf,

    /// Root for per-run judging workspaces
    #[serde(default = "default_judge_dir")]
    pub judge_dir: PathBuf,

    /// Directory for the append-only judge log (unset: tracing only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Wall clock limit for one compilation, in seconds
    #[serde(default = "default_compile_time")]
    pub compile_time: u64,

    /// Maximum submission source size, in kilobytes
    #[serde(default = "default_source_size")]
    pub source_size: u64,

    /// Memory limit for running solutions, in kilobytes
    #[serde(default = "default_mem_limit")]
    pub mem_limit: u64,

    /// Combined stdout/stderr limit per invocation, in kilobytes
    #[serde(default = "default_output_limit")]
    pub output_limit: u64,

    /// Process/thread limit for running solutions
    #[serde(default = "default_process_limit")]
    pub process_limit: u32,

    /// Restricted identity solutions execute under. Unset means the
    /// invoking user (development mode); set but unusable is a hard error.
    #[serde(default)]
    pub run_user: Option<String>,

    /// Number of judging workers in the daemon
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Incoming-directory poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Severity threshold for the judge log
    #[serde(default)]
    pub log_level: LogLevel,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            incoming_dir: default_incoming_dir(),
            submit_dir: default_submit_dir(),
            judge_dir: default_judge_dir(),
            log_dir: None,
            compile_time: default_compile_time(),
            source_size: default_source_size(),
            mem_limit: default_mem_limit(),
            output_limit: default_output_limit(),
            process_limit: default_process_limit(),
            run_user: None,
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            log_level: LogLevel::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Maximum accepted source size in bytes
    pub fn max_source_bytes(&self) -> u64 {
        self.source_size * 1024
    }

    /// Budget for compiling one submission in the given language.
    ///
    /// Per-language overrides may adjust memory and process counts but the
    /// merged budget is always capped by the compile-stage ceiling, so the
    /// wall limit never exceeds `compile_time`.
    pub fn compile_budget(&self, language: &Language) -> ResourceBudget {
        let base = ResourceBudget::new(self.compile_time, COMPILE_MEMORY_KB)
            .with_output_bytes(COMPILE_OUTPUT_BYTES)
            .with_max_processes(COMPILE_PROCESSES);

        let merged = match language.compile.as_ref().and_then(|c| c.limits.as_ref()) {
            Some(overrides) => base.with_overrides(overrides),
            None => base,
        };

        merged.capped_by(&self.compile_ceiling())
    }

    /// Budget for running one test case with the given per-case time limit.
    ///
    /// The run-time limit comes from the test data, not from configuration;
    /// memory, output, and process ceilings come from configuration and
    /// cannot be raised by language overrides (except processes, up to a
    /// fixed ceiling for runtimes with mandatory helper threads).
    pub fn run_budget(&self, time_limit_seconds: u64, language: &Language) -> ResourceBudget {
        let base = ResourceBudget::new(time_limit_seconds, self.mem_limit)
            .with_output_bytes(self.output_limit * 1024)
            .with_max_processes(self.process_limit);

        let merged = match language.run.limits.as_ref() {
            Some(overrides) => base.with_overrides(overrides),
            None => base,
        };

        merged.capped_by(&self.run_ceiling(time_limit_seconds))
    }

    fn compile_ceiling(&self) -> ResourceBudget {
        ResourceBudget::new(self.compile_time, COMPILE_MEMORY_CEILING_KB)
            .with_output_bytes(COMPILE_OUTPUT_BYTES)
            .with_max_processes(PROCESS_CEILING)
    }

    fn run_ceiling(&self, time_limit_seconds: u64) -> ResourceBudget {
        ResourceBudget::new(time_limit_seconds, self.mem_limit)
            .with_output_bytes(self.output_limit * 1024)
            .with_max_processes(PROCESS_CEILING)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_incoming_dir() -> PathBuf {
    PathBuf::from("/var/lib/gavel/incoming")
}

fn default_submit_dir() -> PathBuf {
    PathBuf::from("/var/lib/gavel/submissions")
}

fn default_judge_dir() -> PathBuf {
    PathBuf::from("/var/lib/gavel/judgings")
}

fn default_compile_time() -> u64 {
    30
}

fn default_source_size() -> u64 {
    256
}

fn default_mem_limit() -> u64 {
    524_288
}

fn default_output_limit() -> u64 {
    4096
}

fn default_process_limit() -> u32 {
    15
}

fn default_workers() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}
