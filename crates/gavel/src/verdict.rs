//! Verdict classification and aggregation
//!
//! Turns sandbox observations into the closed verdict enumeration and folds
//! per-test verdicts into the run's overall verdict. Everything here is
//! pure: replaying the same reports in the same order always produces the
//! same verdict.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ExecutionReport, TerminationReason};

/// Terminal classification of a judging run or of a single test case.
///
/// Variants are declared in priority order, most severe first; see
/// [`Verdict::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The toolchain rejected the submission
    CompileError,

    /// Compilation hit the compile-time budget
    CompileTimeLimitExceeded,

    /// A test case hit its wall or CPU limit
    TimeLimitExceeded,

    /// A test case hit the memory ceiling
    MemoryLimitExceeded,

    /// Non-zero exit or fatal signal
    RunTimeError,

    /// A test case hit the output ceiling
    OutputLimitExceeded,

    /// Output did not match the expected answer
    WrongAnswer,

    /// All test cases matched
    Correct,
}

impl Verdict {
    /// Severity rank, 0 = most severe.
    ///
    /// Used when one execution trips several limits at once and for
    /// severity reporting; the overall run verdict comes from
    /// [`aggregate`], which follows test-case order instead.
    pub fn priority(self) -> u8 {
        match self {
            Verdict::CompileError => 0,
            Verdict::CompileTimeLimitExceeded => 1,
            Verdict::TimeLimitExceeded => 2,
            Verdict::MemoryLimitExceeded => 3,
            Verdict::RunTimeError => 4,
            Verdict::OutputLimitExceeded => 5,
            Verdict::WrongAnswer => 6,
            Verdict::Correct => 7,
        }
    }

    /// Check if this verdict means the submission passed
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Verdict::Correct)
    }

    /// The more severe of two verdicts
    pub fn worst(self, other: Verdict) -> Verdict {
        if other.priority() < self.priority() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Verdict::CompileError => "compiler-error",
            Verdict::CompileTimeLimitExceeded => "compiler-timelimit",
            Verdict::TimeLimitExceeded => "timelimit",
            Verdict::MemoryLimitExceeded => "memory-limit",
            Verdict::RunTimeError => "run-error",
            Verdict::OutputLimitExceeded => "output-limit",
            Verdict::WrongAnswer => "wrong-answer",
            Verdict::Correct => "correct",
        };
        write!(f, "{label}")
    }
}

/// Classify one run-stage execution.
///
/// Returns `None` for a launch failure: a child that never started is an
/// infrastructure problem, not a property of the submission, and must not
/// surface as a verdict.
pub fn classify_execution(report: &ExecutionReport, output_matches: bool) -> Option<Verdict> {
    let verdict = match report.termination {
        TerminationReason::LaunchFailed => return None,
        TerminationReason::TimedOut => Verdict::TimeLimitExceeded,
        TerminationReason::MemoryExceeded => Verdict::MemoryLimitExceeded,
        TerminationReason::OutputExceeded => Verdict::OutputLimitExceeded,
        TerminationReason::Signaled(_) => Verdict::RunTimeError,
        TerminationReason::Completed => {
            if report.exit_code != Some(0) {
                Verdict::RunTimeError
            } else if output_matches {
                Verdict::Correct
            } else {
                Verdict::WrongAnswer
            }
        }
    };
    Some(verdict)
}

/// Fold per-test verdicts into the run's overall verdict.
///
/// The overall verdict is the first non-`Correct` verdict in the supplied
/// (externally defined) test-case order; if every case passed, the run is
/// `Correct`. An empty case list is vacuously `Correct`.
pub fn aggregate(verdicts: &[Verdict]) -> Verdict {
    verdicts
        .iter()
        .copied()
        .find(|v| !v.is_accepted())
        .unwrap_or(Verdict::Correct)
}

/// State of a judging run. Transitions are forward-only; a run never
/// re-enters a stage it has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Queued,
    Compiling,
    Compiled,
    Running,
    Aggregated,
}

impl RunState {
    fn ordinal(self) -> u8 {
        match self {
            RunState::Queued => 0,
            RunState::Compiling => 1,
            RunState::Compiled => 2,
            RunState::Running => 3,
            RunState::Aggregated => 4,
        }
    }

    /// Move to the next state, refusing to go backwards or stand still.
    ///
    /// Skipping ahead is allowed: a failed compile goes straight from
    /// `Compiling` to `Aggregated`.
    pub fn advance_to(self, next: RunState) -> Result<RunState, StateTransitionError> {
        if next.ordinal() > self.ordinal() {
            Ok(next)
        } else {
            Err(StateTransitionError { from: self, to: next })
        }
    }

    /// Check if the run has reached its terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Aggregated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal state transition from {from:?} to {to:?}")]
pub struct StateTransitionError {
    pub from: RunState,
    pub to: RunState,
}
