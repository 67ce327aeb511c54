//! Resource limit installation
//!
//! Translates a [`ResourceBudget`] into rlimits the kernel enforces on the
//! child. Validation happens at construction: a budget the limiter cannot
//! express fails fast as a configuration error instead of degrading to an
//! unlimited sandbox.

use crate::sandbox::SandboxError;
use crate::types::ResourceBudget;

/// Installs a budget's limits on a not-yet-started child process
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimiter {
    budget: ResourceBudget,
}

impl ResourceLimiter {
    /// Validate a budget and wrap it for pre-exec installation
    pub fn new(budget: ResourceBudget) -> Result<Self, SandboxError> {
        if budget.max_wall_seconds == 0 {
            return Err(SandboxError::InvalidBudget(
                "wall time limit must be at least 1 second".to_string(),
            ));
        }
        if budget.max_memory_kb == 0 {
            return Err(SandboxError::InvalidBudget(
                "memory limit must be at least 1 KB".to_string(),
            ));
        }
        if budget.max_memory_kb > u64::MAX / 1024 {
            return Err(SandboxError::InvalidBudget(
                "memory limit overflows the address-space rlimit".to_string(),
            ));
        }
        if budget.max_output_bytes == 0 {
            return Err(SandboxError::InvalidBudget(
                "output limit must be at least 1 byte".to_string(),
            ));
        }
        if budget.max_processes == 0 {
            return Err(SandboxError::InvalidBudget(
                "process limit must be at least 1".to_string(),
            ));
        }
        Ok(Self { budget })
    }

    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }

    /// Install the limits. Runs in the child between fork and exec; only
    /// async-signal-safe calls are allowed here.
    ///
    /// `setsid` comes first so the child leads a fresh process group the
    /// supervisor can kill as a whole. CPU gets soft = wall seconds
    /// (SIGXCPU) and hard = +1 (SIGKILL); the wall clock itself is the
    /// supervisor's watchdog, this is the in-kernel backstop. The output
    /// ceiling rides on RLIMIT_FSIZE, which applies to each file the child
    /// writes, capture files included.
    pub(crate) fn apply_pre_exec(&self) -> std::io::Result<()> {
        if unsafe { libc::setsid() } < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let cpu_seconds = self.budget.max_wall_seconds;
        let memory_bytes = self.budget.max_memory_kb * 1024;

        set_rlimit(libc::RLIMIT_CPU, cpu_seconds, cpu_seconds.saturating_add(1))?;
        set_rlimit(libc::RLIMIT_AS, memory_bytes, memory_bytes)?;
        set_rlimit(libc::RLIMIT_STACK, memory_bytes, memory_bytes)?;
        set_rlimit(libc::RLIMIT_DATA, memory_bytes, memory_bytes)?;
        set_rlimit(
            libc::RLIMIT_FSIZE,
            self.budget.max_output_bytes,
            self.budget.max_output_bytes,
        )?;
        set_rlimit(libc::RLIMIT_CORE, 0, 0)?;
        set_rlimit(
            libc::RLIMIT_NPROC,
            u64::from(self.budget.max_processes),
            u64::from(self.budget.max_processes),
        )?;

        Ok(())
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
