//! Judging pipeline
//!
//! Drives one submission end to end: validate, create a unique workspace,
//! compile, run every test case in order, aggregate, and persist the
//! verdict record. Configuration and infrastructure failures escalate;
//! everything the submission itself did folds into the verdict. A
//! submission always ends in exactly one defined state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::{Config, ConfigError};
use crate::logger::JudgeLog;
use crate::sandbox::{Sandbox, SandboxError};
use crate::stages::{self, CompileOutcome, StageError, TestCase, TestOutcome};
use crate::submission::{Submission, SubmissionError};
use crate::types::{ExecutionReport, TerminationReason};
use crate::verdict::{self, RunState, StateTransitionError, Verdict};

/// File name of the per-run verdict record inside the workspace
pub const VERDICT_RECORD: &str = "verdict.json";

/// Bounded retries for transient infrastructure failures, after the first
/// attempt. Compile and run outcomes are never retried.
const MAX_INFRA_RETRIES: u32 = 2;

#[derive(Debug, Error)]
pub enum JudgeError {
    /// The submission failed validation before any workspace existed
    #[error("submission rejected: {0}")]
    Rejected(#[from] SubmissionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    State(#[from] StateTransitionError),

    /// Transient failures exhausted their retry budget; needs an operator
    #[error("infrastructure failure after {attempts} attempts: {message}")]
    Infrastructure { attempts: u32, message: String },

    #[error("judging cancelled")]
    Cancelled,

    /// A verdict for this submission is already recorded; judging again
    /// requires an explicit rejudge request
    #[error("submission '{id}' already judged as '{verdict}'")]
    AlreadyJudged { id: String, verdict: Verdict },

    #[error("failed to encode verdict record: {0}")]
    Record(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One judging request
#[derive(Debug)]
pub struct JudgeRequest<'a> {
    /// The submission to judge
    pub submission: &'a Submission,

    /// Ordered test cases from the test-data provider
    pub tests: &'a [TestCase],

    /// Judge again even if a verdict is already recorded
    pub rejudge: bool,

    /// Cancellation signal (None: not cancellable)
    pub cancel: Option<CancelToken>,
}

/// Per-test details for the result sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub name: String,
    pub verdict: Verdict,
    pub termination: TerminationReason,
    pub wall_time_ms: u64,
    pub cpu_time_ms: u64,
    pub peak_memory_kb: u64,
}

impl From<&TestOutcome> for TestReport {
    fn from(outcome: &TestOutcome) -> Self {
        Self {
            name: outcome.name.clone(),
            verdict: outcome.verdict,
            termination: outcome.report.termination,
            wall_time_ms: outcome.report.wall_time_ms,
            cpu_time_ms: outcome.report.cpu_time_ms,
            peak_memory_kb: outcome.report.peak_memory_kb,
        }
    }
}

/// Resource usage over the whole run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_wall_ms: u64,
    pub max_peak_memory_kb: u64,
}

/// One complete attempt to judge a submission.
///
/// Owned exclusively by the worker executing it; the state machine only
/// moves forward, and the verdict is produced exactly once.
#[derive(Debug, Serialize, Deserialize)]
pub struct JudgingRun {
    submission_id: String,
    workspace: PathBuf,
    state: RunState,
    verdict: Option<Verdict>,
    compile_diagnostics: Option<String>,
    tests: Vec<TestReport>,
    usage: UsageSummary,
}

impl JudgingRun {
    fn new(submission_id: &str, workspace: PathBuf) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            workspace,
            state: RunState::Queued,
            verdict: None,
            compile_diagnostics: None,
            tests: Vec::new(),
            usage: UsageSummary::default(),
        }
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// The terminal verdict; None until the run is aggregated
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub fn compile_diagnostics(&self) -> Option<&str> {
        self.compile_diagnostics.as_deref()
    }

    pub fn tests(&self) -> &[TestReport] {
        &self.tests
    }

    pub fn usage(&self) -> UsageSummary {
        self.usage
    }

    fn advance(&mut self, next: RunState) -> Result<(), StateTransitionError> {
        self.state = self.state.advance_to(next)?;
        Ok(())
    }

    fn observe(&mut self, report: &ExecutionReport) {
        self.usage.total_wall_ms += report.wall_time_ms;
        self.usage.max_peak_memory_kb = self.usage.max_peak_memory_kb.max(report.peak_memory_kb);
    }

    fn finalize(&mut self, verdict: Verdict) -> Result<(), StateTransitionError> {
        self.advance(RunState::Aggregated)?;
        self.verdict = Some(verdict);
        Ok(())
    }
}

/// The judging pipeline: one instance serves many submissions.
///
/// Cheap to clone; workers share the resolved sandbox identity and the log
/// sink but no mutable state.
#[derive(Debug, Clone)]
pub struct JudgePipeline {
    config: Config,
    sandbox: Sandbox,
    log: JudgeLog,
}

impl JudgePipeline {
    /// Build a pipeline, resolving the run user and log sink up front.
    ///
    /// Fails fast on configuration problems; a pipeline that constructed
    /// successfully can enforce everything it promises.
    pub fn new(config: Config) -> Result<Self, JudgeError> {
        let sandbox = Sandbox::from_config(&config)?;
        let log = JudgeLog::new(config.log_dir.as_deref(), config.log_level);
        Ok(Self {
            config,
            sandbox,
            log,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Judge one submission to a terminal state.
    ///
    /// Safe to retry after a transient infrastructure failure: nothing is
    /// recorded until a genuine verdict exists, and a recorded verdict
    /// short-circuits to [`JudgeError::AlreadyJudged`] unless the request
    /// asks for a rejudge.
    #[instrument(skip_all, fields(submission = request.submission.id()))]
    pub async fn judge(&self, request: JudgeRequest<'_>) -> Result<JudgingRun, JudgeError> {
        let submission = request.submission;
        let id = submission.id();

        // Validation happens before any workspace exists; an oversize
        // submission never reaches the sandbox
        if let Err(e) = submission.validate(&self.config) {
            self.log.err("validate", id, &e.to_string());
            return Err(JudgeError::Rejected(e));
        }
        let language = match self.config.get_language(submission.language()) {
            Ok(language) => language,
            Err(e) => {
                self.log.err("validate", id, &e.to_string());
                return Err(JudgeError::Config(e));
            }
        };

        if !request.rejudge
            && let Some(prior) = self.recorded_verdict(id)?
        {
            return Err(JudgeError::AlreadyJudged {
                id: id.to_string(),
                verdict: prior,
            });
        }

        let workspace = self.create_workspace(id).await?;
        self.log
            .info("pipeline", id, &format!("workspace {}", workspace.display()));

        let mut run = JudgingRun::new(id, workspace.clone());

        run.advance(RunState::Compiling)?;
        self.log.info("compile", id, "started");

        let artifact = if language.is_compiled() {
            let outcome = self
                .compile_with_retry(language, submission, &workspace, request.cancel.clone())
                .await?;
            let compile_verdict = outcome.verdict();
            match outcome {
                CompileOutcome::Success { artifact, report } => {
                    run.observe(&report);
                    self.log.info("compile", id, "succeeded");
                    self.log.debug(
                        "compile",
                        id,
                        &format!(
                            "cpu {} ms, peak {} KB",
                            report.cpu_time_ms, report.peak_memory_kb
                        ),
                    );
                    run.advance(RunState::Compiled)?;
                    artifact
                }
                CompileOutcome::Failure {
                    diagnostics,
                    report,
                } => {
                    run.observe(&report);
                    let verdict = compile_verdict.unwrap_or(Verdict::CompileError);
                    self.log.info(
                        "compile",
                        id,
                        &format!("failed ({})", report.termination),
                    );
                    self.log.notice("verdict", id, &verdict.to_string());
                    run.compile_diagnostics = Some(diagnostics);
                    run.finalize(verdict)?;
                    self.persist_record(&run).await?;
                    return Ok(run);
                }
            }
        } else {
            // Interpreted: the staged source is the artifact
            let path = workspace.join(language.source_name());
            tokio::fs::write(&path, submission.source()).await?;
            run.advance(RunState::Compiled)?;
            path
        };

        run.advance(RunState::Running)?;

        let mut verdicts = Vec::with_capacity(request.tests.len());
        for (index, case) in request.tests.iter().enumerate() {
            if is_cancelled(&request.cancel) {
                self.log
                    .notice("run", id, "cancelled, abandoning remaining test cases");
                return Err(JudgeError::Cancelled);
            }

            self.log
                .info("run", id, &format!("test case '{}' started", case.name));

            let outcome = self
                .run_test_with_retry(
                    id,
                    language,
                    &artifact,
                    &workspace,
                    index,
                    case,
                    request.cancel.clone(),
                )
                .await?;

            // A kill caused by cancellation must not masquerade as a verdict
            if is_cancelled(&request.cancel) {
                self.log
                    .notice("run", id, "cancelled, abandoning remaining test cases");
                return Err(JudgeError::Cancelled);
            }

            run.observe(&outcome.report);
            self.log.debug(
                "run",
                id,
                &format!(
                    "test case '{}': cpu {} ms, peak {} KB",
                    case.name, outcome.report.cpu_time_ms, outcome.report.peak_memory_kb
                ),
            );
            self.log.info(
                "run",
                id,
                &format!("test case '{}' finished: {}", case.name, outcome.verdict),
            );

            verdicts.push(outcome.verdict);
            run.tests.push(TestReport::from(&outcome));
        }

        let overall = verdict::aggregate(&verdicts);
        self.log.notice("verdict", id, &overall.to_string());
        run.finalize(overall)?;
        self.persist_record(&run).await?;

        Ok(run)
    }

    /// Create the run's workspace: a unique, unpredictable directory under
    /// `judge_dir`, retried within the infrastructure budget.
    async fn create_workspace(&self, id: &str) -> Result<PathBuf, JudgeError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let workspace = self
                .config
                .judge_dir
                .join(format!("{id}-{}", Uuid::new_v4().simple()));
            match tokio::fs::create_dir_all(&workspace).await {
                Ok(()) => return Ok(workspace),
                Err(e) if attempts <= MAX_INFRA_RETRIES => {
                    self.log.err(
                        "pipeline",
                        id,
                        &format!("workspace creation failed (attempt {attempts}): {e}"),
                    );
                }
                Err(e) => {
                    return Err(JudgeError::Infrastructure {
                        attempts,
                        message: format!("workspace creation failed: {e}"),
                    });
                }
            }
        }
    }

    async fn compile_with_retry(
        &self,
        language: &crate::config::Language,
        submission: &Submission,
        workspace: &Path,
        cancel: Option<CancelToken>,
    ) -> Result<CompileOutcome, JudgeError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match stages::compile(
                &self.sandbox,
                &self.config,
                language,
                submission,
                workspace,
                cancel.clone(),
            )
            .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempts <= MAX_INFRA_RETRIES => {
                    self.log.err(
                        "compile",
                        submission.id(),
                        &format!("transient failure (attempt {attempts}): {e}"),
                    );
                }
                Err(e) => return Err(escalate_stage_error(e, attempts)),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_test_with_retry(
        &self,
        submission_id: &str,
        language: &crate::config::Language,
        artifact: &Path,
        workspace: &Path,
        index: usize,
        case: &TestCase,
        cancel: Option<CancelToken>,
    ) -> Result<TestOutcome, JudgeError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match stages::run_test(
                &self.sandbox,
                &self.config,
                language,
                artifact,
                workspace,
                index,
                case,
                cancel.clone(),
            )
            .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempts <= MAX_INFRA_RETRIES => {
                    self.log.err(
                        "run",
                        submission_id,
                        &format!(
                            "test case '{}' transient failure (attempt {attempts}): {e}",
                            case.name
                        ),
                    );
                }
                Err(e) => return Err(escalate_stage_error(e, attempts)),
            }
        }
    }

    /// Look up the verdict of a previously recorded run for this id
    fn recorded_verdict(&self, id: &str) -> Result<Option<Verdict>, JudgeError> {
        let entries = match std::fs::read_dir(&self.config.judge_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JudgeError::Io(e)),
        };

        let prefix = format!("{id}-");
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            // Workspace names end in one uuid segment; anything else is a
            // different submission id sharing a prefix
            if rest.contains('-') || rest.len() != 32 {
                continue;
            }

            let record_path = entry.path().join(VERDICT_RECORD);
            let Ok(bytes) = std::fs::read(&record_path) else {
                continue;
            };
            match serde_json::from_slice::<JudgingRun>(&bytes) {
                Ok(run) => {
                    if let Some(verdict) = run.verdict {
                        return Ok(Some(verdict));
                    }
                }
                Err(e) => {
                    warn!(path = %record_path.display(), error = %e, "unreadable verdict record");
                }
            }
        }

        Ok(None)
    }

    async fn persist_record(&self, run: &JudgingRun) -> Result<(), JudgeError> {
        let bytes = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(run.workspace.join(VERDICT_RECORD), bytes).await?;
        Ok(())
    }
}

fn is_cancelled(cancel: &Option<CancelToken>) -> bool {
    cancel.as_ref().is_some_and(CancelToken::is_cancelled)
}

fn escalate_stage_error(error: StageError, attempts: u32) -> JudgeError {
    match error {
        StageError::Sandbox(e) => JudgeError::Sandbox(e),
        StageError::NotCompiled(name) => JudgeError::Config(ConfigError::Invalid(format!(
            "language '{name}' has no compile step"
        ))),
        StageError::Launch(message) => JudgeError::Infrastructure { attempts, message },
        StageError::Io(e) => JudgeError::Infrastructure {
            attempts,
            message: e.to_string(),
        },
    }
}
