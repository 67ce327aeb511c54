//! Judging stages
//!
//! The pipeline's two sandbox-facing stages: compiling the submission and
//! running the artifact against test cases. Both translate configuration
//! into per-invocation budgets and leave verdict aggregation to the
//! pipeline.

use thiserror::Error;

pub use crate::stages::compile::{CompileOutcome, compile};
pub use crate::stages::run::{TestCase, TestOutcome, load_test_dir, run_test};

mod compile;
mod run;

use crate::sandbox::SandboxError;

/// Errors that occur while driving a stage
#[derive(Debug, Error)]
pub enum StageError {
    /// The language has no compile step; callers should skip the stage
    #[error("language '{0}' does not require compilation")]
    NotCompiled(String),

    /// The sandboxed child never started; transient, worth a bounded retry
    #[error("sandbox launch failed: {0}")]
    Launch(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Check whether a bounded retry could plausibly help
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Launch(_) | StageError::Io(_))
    }
}
