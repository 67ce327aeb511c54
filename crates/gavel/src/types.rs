use serde::{Deserialize, Serialize};

/// Enforceable ceilings for one sandbox invocation.
///
/// A budget is a value object: it is derived from configuration (or from a
/// test case) once per stage invocation and never mutated afterwards. All
/// fields are hard limits the operating system enforces on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Wall clock limit in seconds
    pub max_wall_seconds: u64,

    /// Memory limit (address space) in kilobytes
    pub max_memory_kb: u64,

    /// Combined stdout/stderr limit in bytes
    pub max_output_bytes: u64,

    /// Maximum number of processes/threads in the sandbox
    pub max_processes: u32,
}

impl ResourceBudget {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Default output ceiling (4 MB of combined stdout/stderr)
    pub const DEFAULT_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

    /// Create a budget with the given wall time and memory ceilings
    pub fn new(max_wall_seconds: u64, max_memory_kb: u64) -> Self {
        Self {
            max_wall_seconds,
            max_memory_kb,
            max_output_bytes: Self::DEFAULT_OUTPUT_BYTES,
            max_processes: 1,
        }
    }

    /// Set the combined output ceiling in bytes
    pub fn with_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the process/thread ceiling
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = count;
        self
    }

    /// Apply optional overrides, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &BudgetOverrides) -> ResourceBudget {
        ResourceBudget {
            max_wall_seconds: overrides.wall_seconds.unwrap_or(self.max_wall_seconds),
            max_memory_kb: overrides.memory_kb.unwrap_or(self.max_memory_kb),
            max_output_bytes: overrides
                .output_kb
                .map(|kb| kb * 1024)
                .unwrap_or(self.max_output_bytes),
            max_processes: overrides.max_processes.unwrap_or(self.max_processes),
        }
    }

    /// Element-wise minimum against a ceiling.
    ///
    /// No stage may begin with a budget above its configured ceiling, so
    /// override merging always ends with a `capped_by` against that ceiling.
    pub fn capped_by(&self, ceiling: &ResourceBudget) -> ResourceBudget {
        ResourceBudget {
            max_wall_seconds: self.max_wall_seconds.min(ceiling.max_wall_seconds),
            max_memory_kb: self.max_memory_kb.min(ceiling.max_memory_kb),
            max_output_bytes: self.max_output_bytes.min(ceiling.max_output_bytes),
            max_processes: self.max_processes.min(ceiling.max_processes),
        }
    }

    /// Check that every field is within the given ceiling
    #[must_use]
    pub fn fits_within(&self, ceiling: &ResourceBudget) -> bool {
        self.max_wall_seconds <= ceiling.max_wall_seconds
            && self.max_memory_kb <= ceiling.max_memory_kb
            && self.max_output_bytes <= ceiling.max_output_bytes
            && self.max_processes <= ceiling.max_processes
    }
}

/// Optional per-language adjustments to a base budget.
///
/// Absent fields keep the base value. Merging never bypasses the stage
/// ceiling; callers cap the merged budget afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetOverrides {
    /// Wall clock limit in seconds
    #[serde(default)]
    pub wall_seconds: Option<u64>,

    /// Memory limit in kilobytes
    #[serde(default)]
    pub memory_kb: Option<u64>,

    /// Combined output limit in kilobytes
    #[serde(default)]
    pub output_kb: Option<u64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,
}

/// Why a sandboxed process stopped.
///
/// `Completed` covers every normal exit, including non-zero exit codes;
/// mapping those onto verdicts is the verdict engine's job, not the
/// sandbox's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Process exited on its own
    Completed,

    /// Killed at the wall or CPU deadline
    TimedOut,

    /// Memory ceiling hit (allocation failure or kill)
    MemoryExceeded,

    /// Output ceiling hit (SIGXFSZ on a capture file)
    OutputExceeded,

    /// Killed by some other signal
    Signaled(i32),

    /// The child could not be started at all
    LaunchFailed,
}

impl TerminationReason {
    /// Check whether this reason represents an exceeded resource limit
    #[must_use]
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            TerminationReason::TimedOut
                | TerminationReason::MemoryExceeded
                | TerminationReason::OutputExceeded
        )
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::TimedOut => write!(f, "timed out"),
            TerminationReason::MemoryExceeded => write!(f, "memory limit exceeded"),
            TerminationReason::OutputExceeded => write!(f, "output limit exceeded"),
            TerminationReason::Signaled(sig) => write!(f, "killed by signal {sig}"),
            TerminationReason::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

/// Everything observed about one sandbox invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Why the process stopped
    pub termination: TerminationReason,

    /// Exit code if the process exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the process was killed by a signal
    pub signal: Option<i32>,

    /// Wall clock time consumed in milliseconds
    pub wall_time_ms: u64,

    /// CPU time (user + system) consumed in milliseconds
    pub cpu_time_ms: u64,

    /// Peak resident set size in kilobytes
    pub peak_memory_kb: u64,

    /// Captured standard output, truncated at the output ceiling
    #[serde(skip)]
    pub stdout: Vec<u8>,

    /// Captured standard error, truncated at the output ceiling
    #[serde(skip)]
    pub stderr: Vec<u8>,

    /// Whether stdout was cut at the ceiling when read back
    pub stdout_truncated: bool,

    /// Whether stderr was cut at the ceiling when read back
    pub stderr_truncated: bool,
}

impl ExecutionReport {
    /// Check if the execution completed with exit code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.termination, TerminationReason::Completed) && self.exit_code == Some(0)
    }

    /// Report for a child that never started; the launch error text goes
    /// where compiler diagnostics would, so callers surface it uniformly.
    pub fn launch_failed(error: &std::io::Error) -> Self {
        Self {
            termination: TerminationReason::LaunchFailed,
            stderr: error.to_string().into_bytes(),
            ..Self::default()
        }
    }
}

impl Default for ExecutionReport {
    fn default() -> Self {
        Self {
            termination: TerminationReason::Completed,
            exit_code: None,
            signal: None,
            wall_time_ms: 0,
            cpu_time_ms: 0,
            peak_memory_kb: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }
}
