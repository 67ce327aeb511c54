//! Sandboxed process execution
//!
//! This module launches untrusted code under a restricted identity with
//! OS-enforced resource limits and owns the child's whole lifecycle: the
//! pre-exec lockdown (new process group, rlimits, privilege drop), the
//! wall-clock watchdog, the rusage reap, and the teardown kill that
//! guarantees no descendant survives — a fork bomb dies with its group.

use std::path::PathBuf;

use thiserror::Error;

pub use crate::sandbox::identity::RestrictedIdentity;
pub use crate::sandbox::limits::ResourceLimiter;
pub use crate::sandbox::process::{ExecRequest, Sandbox};

mod identity;
mod limits;
mod process;

/// Errors that occur while setting up or supervising a sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid resource budget: {0}")]
    InvalidBudget(String),

    #[error("empty sandbox command")]
    EmptyCommand,

    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),

    #[error("run user '{0}' not found")]
    UnknownUser(String),

    #[error("failed to look up run user '{user}': {message}")]
    UserLookup { user: String, message: String },

    #[error("privilege drop to '{0}' requires running as root")]
    PrivilegeRequired(String),

    #[error("failed to reap sandboxed process: {0}")]
    Wait(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the program in a command to an absolute path using the host's PATH.
///
/// The sandboxed child runs with a cleared environment and a fixed PATH, so
/// toolchain commands configured as bare names (like `g++`) are resolved on
/// the host before the sandbox ever sees them. Commands that already contain
/// a `/` are left unchanged.
pub fn resolve_command(command: &mut [String]) -> Result<(), SandboxError> {
    let first = match command.first_mut() {
        Some(first) => first,
        None => return Ok(()),
    };

    // Already an absolute or relative path
    if first.contains('/') {
        return Ok(());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':') {
        let candidate = PathBuf::from(dir).join(&*first);
        if candidate.exists() {
            // Canonicalize so symlinked toolchains resolve to something the
            // restricted user can execute directly
            *first = std::fs::canonicalize(&candidate)
                .unwrap_or(candidate)
                .to_string_lossy()
                .into_owned();
            return Ok(());
        }
    }

    Err(SandboxError::CommandNotFound(first.clone()))
}
