//! Compile stage
//!
//! Invokes the language's toolchain inside the sandbox, bounded by the
//! configured compile time. A compile that hits its budget is a distinct
//! terminal verdict from a genuine compiler diagnostic; neither is followed
//! by a run stage.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::config::{Config, DEFAULT_SANDBOX_PATH, Language};
use crate::sandbox::{ExecRequest, Sandbox, resolve_command};
use crate::stages::StageError;
use crate::submission::Submission;
use crate::types::{ExecutionReport, TerminationReason};
use crate::verdict::Verdict;

/// Result of the compile stage
#[derive(Debug)]
pub enum CompileOutcome {
    /// The toolchain produced an artifact
    Success {
        artifact: PathBuf,
        report: ExecutionReport,
    },

    /// Compilation failed; the diagnostics are what the contestant sees
    Failure {
        diagnostics: String,
        report: ExecutionReport,
    },
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success { .. })
    }

    /// The terminal verdict a failure maps to; `None` for success
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            CompileOutcome::Success { .. } => None,
            CompileOutcome::Failure { report, .. } => {
                if report.termination == TerminationReason::TimedOut {
                    Some(Verdict::CompileTimeLimitExceeded)
                } else {
                    Some(Verdict::CompileError)
                }
            }
        }
    }
}

/// Compile a submission in its workspace.
///
/// Toolchain selection is a pure function of the declared language; this
/// returns [`StageError::NotCompiled`] for interpreted languages so the
/// pipeline can skip the stage explicitly.
#[instrument(skip_all, fields(submission = submission.id(), language = %language.name))]
pub async fn compile(
    sandbox: &Sandbox,
    config: &Config,
    language: &Language,
    submission: &Submission,
    workspace: &Path,
    cancel: Option<CancelToken>,
) -> Result<CompileOutcome, StageError> {
    let compile_config = language
        .compile
        .as_ref()
        .ok_or_else(|| StageError::NotCompiled(language.name.clone()))?;

    let source_path = workspace.join(&compile_config.source_name);
    tokio::fs::write(&source_path, submission.source()).await?;

    debug!(source = %source_path.display(), "wrote source file");

    let budget = config.compile_budget(language);

    let mut argv = Language::expand_command(
        &compile_config.command,
        &compile_config.source_name,
        &compile_config.output_name,
    );
    resolve_command(&mut argv)?;

    let stdout_path = workspace.join("compile.out");
    let stderr_path = workspace.join("compile.err");

    let report = sandbox
        .execute(ExecRequest {
            command: argv,
            working_dir: workspace,
            stdin: None,
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            env: &compile_config.env,
            path_var: DEFAULT_SANDBOX_PATH,
            budget,
            cancel,
        })
        .await?;

    if report.termination == TerminationReason::LaunchFailed {
        return Err(StageError::Launch(
            String::from_utf8_lossy(&report.stderr).into_owned(),
        ));
    }

    if report.is_success() {
        let artifact = workspace.join(&compile_config.output_name);
        if !artifact.exists() {
            // A toolchain that exits 0 without an artifact is lying;
            // surface its output as a compile error, not a crash later
            let diagnostics = format!(
                "compiler reported success but produced no '{}'\n{}",
                compile_config.output_name,
                assemble_diagnostics(&report)
            );
            return Ok(CompileOutcome::Failure {
                diagnostics,
                report,
            });
        }

        debug!(artifact = %artifact.display(), "compilation succeeded");
        return Ok(CompileOutcome::Success { artifact, report });
    }

    let diagnostics = assemble_diagnostics(&report);
    debug!(
        termination = %report.termination,
        exit_code = ?report.exit_code,
        "compilation failed"
    );

    Ok(CompileOutcome::Failure {
        diagnostics,
        report,
    })
}

/// Combine the compiler's stdout and stderr into one diagnostic text
fn assemble_diagnostics(report: &ExecutionReport) -> String {
    let stdout = String::from_utf8_lossy(&report.stdout);
    let stderr = String::from_utf8_lossy(&report.stderr);

    let mut diagnostics = String::new();
    diagnostics.push_str(stdout.trim_end());
    if !diagnostics.is_empty() && !stderr.trim_end().is_empty() {
        diagnostics.push('\n');
    }
    diagnostics.push_str(stderr.trim_end());

    if diagnostics.is_empty() {
        diagnostics.push_str(&report.termination.to_string());
    }
    diagnostics
}
