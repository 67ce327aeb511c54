//! A library for judging programming-contest submissions.
//!
//! Gavel compiles and executes untrusted, possibly adversarial source code
//! under hard OS-enforced resource bounds, then produces a deterministic
//! verdict. The sandbox drops privileges to a restricted user, bounds wall
//! and CPU time, memory, output size, and process counts, and guarantees
//! that nothing the judged program spawned survives its teardown.
//!
//! # Features
//!
//! - **Sandboxed execution** — rlimit-bounded process groups under a
//!   restricted identity, with process-group teardown on every exit path.
//! - **Multi-language** — TOML-configured compilers and runtimes for both
//!   compiled and interpreted languages.
//! - **Deterministic verdicts** — a closed verdict enumeration with a fixed
//!   priority order and order-preserving aggregation across test cases.
//! - **Directory queue** — atomic move-then-claim handoff between intake
//!   and a fixed-size pool of judging workers.
//! - **Judge log** — syslog-style append-only audit trail of every stage
//!   transition, mirrored into `tracing`.

pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use compare::{
    ComparatorKind, ExactComparator, LineComparator, OutputComparator, TokenComparator,
};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use logger::{JudgeLog, LogLevel};
pub use pipeline::{
    JudgeError, JudgePipeline, JudgeRequest, JudgingRun, TestReport, UsageSummary, VERDICT_RECORD,
};
pub use queue::{ClaimedSubmission, IncomingQueue, WorkerPool};
pub use sandbox::{ExecRequest, ResourceLimiter, RestrictedIdentity, Sandbox, SandboxError};
pub use stages::{CompileOutcome, StageError, TestCase, TestOutcome, load_test_dir};
pub use submission::{Submission, SubmissionError};
pub use types::{BudgetOverrides, ExecutionReport, ResourceBudget, TerminationReason};
pub use verdict::{RunState, Verdict};

pub mod cancel;
pub mod compare;
pub mod config;
pub mod logger;
pub mod pipeline;
pub mod queue;
pub mod sandbox;
pub mod stages;
pub mod submission;
pub mod types;
pub mod verdict;
