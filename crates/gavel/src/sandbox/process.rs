//! Process supervision
//!
//! Spawns the sandboxed child with its lockdown applied, supervises it
//! against the wall clock and the cancellation signal, reaps it with
//! rusage accounting, and classifies why it stopped. When `execute`
//! returns, no process from the child's group is left alive.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::sandbox::{ResourceLimiter, RestrictedIdentity, SandboxError};
use crate::types::{ExecutionReport, ResourceBudget, TerminationReason};

/// Only this much of stderr is scanned for allocator diagnostics
const STDERR_SCAN_BYTES: usize = 64 * 1024;

/// One sandboxed invocation: what to run, where, and within which bounds
#[derive(Debug)]
pub struct ExecRequest<'a> {
    /// Argv; the program must be an absolute or relative path
    /// (see [`resolve_command`](crate::sandbox::resolve_command))
    pub command: Vec<String>,

    /// Working directory, confined to the run's workspace
    pub working_dir: &'a Path,

    /// File to feed the child's stdin (None: /dev/null)
    pub stdin: Option<&'a Path>,

    /// Capture file for stdout
    pub stdout_path: &'a Path,

    /// Capture file for stderr
    pub stderr_path: &'a Path,

    /// Extra environment variables (the rest of the environment is cleared)
    pub env: &'a HashMap<String, String>,

    /// PATH visible inside the sandbox
    pub path_var: &'a str,

    /// Resource ceilings for this invocation
    pub budget: ResourceBudget,

    /// Cancellation signal (None: not cancellable)
    pub cancel: Option<CancelToken>,
}

/// Launches commands under a restricted identity with budgets applied.
///
/// Construction resolves `run_user` once; every later `execute` reuses that
/// capability. Without a configured user the sandbox still enforces all
/// resource limits but runs children as the invoking user.
#[derive(Debug, Clone)]
pub struct Sandbox {
    identity: Option<RestrictedIdentity>,
}

impl Sandbox {
    /// Build a sandbox from configuration, resolving `run_user` up front
    pub fn from_config(config: &Config) -> Result<Self, SandboxError> {
        let identity = match config.run_user {
            Some(ref name) => Some(RestrictedIdentity::resolve(name)?),
            None => {
                warn!("no run_user configured; sandboxed code runs as the invoking user");
                None
            }
        };
        Ok(Self { identity })
    }

    /// A sandbox without identity drop, for development and tests
    pub fn unrestricted() -> Self {
        Self { identity: None }
    }

    pub fn identity(&self) -> Option<&RestrictedIdentity> {
        self.identity.as_ref()
    }

    /// Run one command to completion under the request's budget.
    ///
    /// Launch failures come back as a report with
    /// [`TerminationReason::LaunchFailed`] so callers can decide between
    /// retry and escalation; errors from this function itself mean the
    /// supervisor (not the child) is broken.
    #[instrument(skip(self, request), fields(command = %request.command.first().map(String::as_str).unwrap_or("")))]
    pub async fn execute(&self, request: ExecRequest<'_>) -> Result<ExecutionReport, SandboxError> {
        let limiter = ResourceLimiter::new(request.budget)?;
        if request.command.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }

        let stdin = match request.stdin {
            Some(path) => Stdio::from(File::open(path)?),
            None => Stdio::null(),
        };
        let stdout = File::create(request.stdout_path)?;
        let stderr = File::create(request.stderr_path)?;

        let mut command = std::process::Command::new(&request.command[0]);
        command
            .args(&request.command[1..])
            .current_dir(request.working_dir)
            .env_clear()
            .env("PATH", request.path_var)
            .envs(request.env)
            .stdin(stdin)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let identity = self.identity.clone();
        // Safety: the closure only makes async-signal-safe syscalls
        // (setsid, setrlimit, setgroups, setresgid, setresuid)
        unsafe {
            command.pre_exec(move || {
                limiter.apply_pre_exec()?;
                if let Some(ref identity) = identity {
                    identity.apply_pre_exec()?;
                }
                Ok(())
            });
        }

        let started = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "sandbox launch failed");
                return Ok(ExecutionReport::launch_failed(&e));
            }
        };
        let pid = child.id() as libc::pid_t;

        debug!(pid, "sandboxed process started");

        // Watchdog: the wall deadline and the cancel signal both end in a
        // group kill; wait4 below then observes the death.
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let timed_out = Arc::clone(&timed_out);
            let deadline = Duration::from_secs(request.budget.max_wall_seconds);
            let cancel = request.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        timed_out.store(true, Ordering::SeqCst);
                        kill_group(pid);
                    }
                    _ = wait_cancelled(cancel) => {
                        kill_group(pid);
                    }
                }
            })
        };

        // Reap with rusage accounting; the wait is bounded by the watchdog
        let reaped = tokio::task::spawn_blocking(move || {
            // Keep the handle alive until wait4 has reaped the pid
            let _child = child;
            wait_with_rusage(pid)
        })
        .await;

        watchdog.abort();
        // Teardown: whatever the child spawned dies with its group
        kill_group(pid);

        let wall_time = started.elapsed();
        let (status, cpu_time_ms, peak_memory_kb) = reaped
            .map_err(|e| SandboxError::Wait(e.to_string()))??;
        let (exit_code, signal) = decode_wait_status(status);

        let (stdout, stdout_truncated) =
            read_capped(request.stdout_path, request.budget.max_output_bytes).await?;
        let (stderr, stderr_truncated) =
            read_capped(request.stderr_path, request.budget.max_output_bytes).await?;

        let observation = Observation {
            timed_out: timed_out.load(Ordering::SeqCst),
            signal,
            cpu_time_ms,
            peak_memory_kb,
            stderr: &stderr,
        };
        let termination = classify_termination(&observation, &request.budget);

        debug!(
            ?termination,
            exit_code,
            signal,
            wall_ms = wall_time.as_millis() as u64,
            cpu_ms = cpu_time_ms,
            peak_kb = peak_memory_kb,
            "sandboxed process finished"
        );

        Ok(ExecutionReport {
            termination,
            exit_code,
            signal,
            wall_time_ms: wall_time.as_millis() as u64,
            cpu_time_ms,
            peak_memory_kb,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

async fn wait_cancelled(cancel: Option<CancelToken>) {
    match cancel {
        Some(mut token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Kill the child's whole process group, then the child itself.
///
/// ESRCH means everything is already gone; the direct kill covers the
/// window before the child's setsid has taken effect.
fn kill_group(pid: libc::pid_t) {
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
        libc::kill(pid, libc::SIGKILL);
    }
}

/// Reap the child, retrying on EINTR, and pull cpu time and peak RSS out
/// of the rusage record.
fn wait_with_rusage(pid: libc::pid_t) -> Result<(i32, u64, u64), SandboxError> {
    let mut status: libc::c_int = 0;
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut rusage) };
        if rc == pid {
            break;
        }
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(SandboxError::Wait(err.to_string()));
        }
    }

    let cpu_time_ms = timeval_ms(&rusage.ru_utime) + timeval_ms(&rusage.ru_stime);
    // ru_maxrss is kilobytes on Linux
    let peak_memory_kb = rusage.ru_maxrss.max(0) as u64;

    Ok((status, cpu_time_ms, peak_memory_kb))
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec.max(0) as u64) * 1000 + (tv.tv_usec.max(0) as u64) / 1000
}

fn decode_wait_status(status: i32) -> (Option<i32>, Option<i32>) {
    if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    }
}

/// Read a capture file back, cutting it at the output ceiling
async fn read_capped(path: &Path, cap: u64) -> Result<(Vec<u8>, bool), SandboxError> {
    let mut bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        // The child may have been killed before the file ever existed
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(SandboxError::Io(e)),
    };
    let truncated = bytes.len() as u64 > cap;
    if truncated {
        bytes.truncate(cap as usize);
    }
    Ok((bytes, truncated))
}

struct Observation<'a> {
    timed_out: bool,
    signal: Option<i32>,
    cpu_time_ms: u64,
    peak_memory_kb: u64,
    stderr: &'a [u8],
}

/// Decide why the child stopped, in limit-priority order: time beats
/// output beats memory; anything else signalled is a plain signal death.
fn classify_termination(obs: &Observation<'_>, budget: &ResourceBudget) -> TerminationReason {
    if obs.timed_out
        || obs.signal == Some(libc::SIGXCPU)
        || obs.cpu_time_ms >= budget.max_wall_seconds * 1000
    {
        return TerminationReason::TimedOut;
    }

    if obs.signal == Some(libc::SIGXFSZ) {
        return TerminationReason::OutputExceeded;
    }

    if obs.peak_memory_kb >= budget.max_memory_kb {
        return TerminationReason::MemoryExceeded;
    }

    // Allocators failing under the address-space cap abort well below the
    // RSS ceiling; the diagnostic on stderr is the only trace left.
    let scan = &obs.stderr[..obs.stderr.len().min(STDERR_SCAN_BYTES)];
    if contains(scan, b"bad_alloc") || contains(scan, b"MemoryError") {
        return TerminationReason::MemoryExceeded;
    }

    if let Some(signal) = obs.signal {
        return TerminationReason::Signaled(signal);
    }

    // Exit codes, zero or not, are the verdict engine's business
    TerminationReason::Completed
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs<'a>() -> Observation<'a> {
        Observation {
            timed_out: false,
            signal: None,
            cpu_time_ms: 10,
            peak_memory_kb: 1024,
            stderr: b"",
        }
    }

    fn budget() -> ResourceBudget {
        ResourceBudget::new(2, 65536)
    }

    #[test]
    fn classify_clean_exit() {
        assert_eq!(
            classify_termination(&obs(), &budget()),
            TerminationReason::Completed
        );
    }

    #[test]
    fn classify_watchdog_timeout() {
        let observation = Observation {
            timed_out: true,
            signal: Some(libc::SIGKILL),
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::TimedOut
        );
    }

    #[test]
    fn classify_cpu_rlimit_signal() {
        let observation = Observation {
            signal: Some(libc::SIGXCPU),
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::TimedOut
        );
    }

    #[test]
    fn classify_cpu_time_at_budget() {
        let observation = Observation {
            cpu_time_ms: 2000,
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::TimedOut
        );
    }

    #[test]
    fn classify_output_limit_signal() {
        let observation = Observation {
            signal: Some(libc::SIGXFSZ),
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::OutputExceeded
        );
    }

    #[test]
    fn classify_peak_memory_at_ceiling() {
        let observation = Observation {
            peak_memory_kb: 65536,
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::MemoryExceeded
        );
    }

    #[test]
    fn classify_allocator_diagnostic_as_memory() {
        let observation = Observation {
            signal: Some(libc::SIGABRT),
            stderr: b"terminate called after throwing an instance of 'std::bad_alloc'",
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::MemoryExceeded
        );

        let python = Observation {
            stderr: b"MemoryError",
            ..obs()
        };
        assert_eq!(
            classify_termination(&python, &budget()),
            TerminationReason::MemoryExceeded
        );
    }

    #[test]
    fn classify_time_beats_memory_when_both_trip() {
        let observation = Observation {
            timed_out: true,
            peak_memory_kb: u64::MAX,
            signal: Some(libc::SIGKILL),
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::TimedOut
        );
    }

    #[test]
    fn classify_other_signal() {
        let observation = Observation {
            signal: Some(libc::SIGSEGV),
            ..obs()
        };
        assert_eq!(
            classify_termination(&observation, &budget()),
            TerminationReason::Signaled(libc::SIGSEGV)
        );
    }

    #[test]
    fn decode_exited_status() {
        // Crafted per the Linux wait status layout
        let status = 0x0100; // exit(1)
        assert_eq!(decode_wait_status(status), (Some(1), None));
        assert_eq!(decode_wait_status(0), (Some(0), None));
    }

    #[test]
    fn decode_signaled_status() {
        let status = libc::SIGKILL; // killed by SIGKILL, no core
        assert_eq!(decode_wait_status(status), (None, Some(libc::SIGKILL)));
    }
}
