//! Run stage
//!
//! Executes the compiled artifact once per test case, each in a fresh
//! subdirectory of the run's workspace so no state leaks between cases.
//! Test cases arrive in an externally defined order and that order is
//! preserved; verdict aggregation depends on it.

use std::path::Path;

use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::compare::ComparatorKind;
use crate::config::{Config, Language};
use crate::sandbox::{ExecRequest, Sandbox, resolve_command};
use crate::stages::StageError;
use crate::types::ExecutionReport;
use crate::verdict::{Verdict, classify_execution};

/// One input/expected-output pair with its per-case time budget.
///
/// The time limit travels with the test data: running and compiling have
/// materially different budget needs, so the run budget is supplied by the
/// test-data provider rather than taken from the compile configuration.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub input: Vec<u8>,
    pub expected: Vec<u8>,
    pub time_limit: u64,
    pub comparator: ComparatorKind,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        input: Vec<u8>,
        expected: Vec<u8>,
        time_limit: u64,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            expected,
            time_limit,
            comparator: ComparatorKind::default(),
        }
    }

    pub fn with_comparator(mut self, comparator: ComparatorKind) -> Self {
        self.comparator = comparator;
        self
    }
}

/// Verdict and raw observations for one executed test case
#[derive(Debug)]
pub struct TestOutcome {
    pub name: String,
    pub verdict: Verdict,
    pub report: ExecutionReport,
}

/// Run one test case against the artifact.
///
/// The artifact is staged into the case's own directory (hard link when
/// possible, copy otherwise) and executed with the case input on stdin;
/// stdout/stderr captures stay on disk next to the input.
#[instrument(skip_all, fields(case = %case.name, time_limit = case.time_limit))]
pub async fn run_test(
    sandbox: &Sandbox,
    config: &Config,
    language: &Language,
    artifact: &Path,
    workspace: &Path,
    index: usize,
    case: &TestCase,
    cancel: Option<CancelToken>,
) -> Result<TestOutcome, StageError> {
    let test_dir = workspace.join(format!("t{:03}-{}", index, sanitize_name(&case.name)));
    tokio::fs::create_dir_all(&test_dir).await?;

    let artifact_name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("artifact path '{}' has no file name", artifact.display()),
            ))
        })?;

    let staged = test_dir.join(artifact_name);
    if std::fs::hard_link(artifact, &staged).is_err() {
        tokio::fs::copy(artifact, &staged).await?;
    }

    let input_path = test_dir.join("stdin.txt");
    tokio::fs::write(&input_path, &case.input).await?;

    let stdout_path = test_dir.join("stdout.txt");
    let stderr_path = test_dir.join("stderr.txt");

    let budget = config.run_budget(case.time_limit, language);

    let mut argv = Language::expand_command(
        &language.run.command,
        artifact_name,
        &format!("./{artifact_name}"),
    );
    resolve_command(&mut argv)?;

    debug!(?argv, dir = %test_dir.display(), "running test case");

    let report = sandbox
        .execute(ExecRequest {
            command: argv,
            working_dir: &test_dir,
            stdin: Some(&input_path),
            stdout_path: &stdout_path,
            stderr_path: &stderr_path,
            env: &language.run.env,
            path_var: &language.run.path,
            budget,
            cancel,
        })
        .await?;

    let matches = case
        .comparator
        .instance()
        .compare(&report.stdout, &case.expected);

    let Some(verdict) = classify_execution(&report, matches) else {
        return Err(StageError::Launch(
            String::from_utf8_lossy(&report.stderr).into_owned(),
        ));
    };

    debug!(%verdict, termination = %report.termination, "test case finished");

    Ok(TestOutcome {
        name: case.name.clone(),
        verdict,
        report,
    })
}

/// Load ordered test cases from a problem directory.
///
/// The convention is `<case>.in` with a matching `<case>.ans`, taken in
/// lexicographic order of the case name; that order is the judging order.
pub fn load_test_dir(
    dir: &Path,
    time_limit: u64,
    comparator: ComparatorKind,
) -> Result<Vec<TestCase>, StageError> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(name) = file_name.strip_suffix(".in") {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut cases = Vec::with_capacity(names.len());
    for name in names {
        let input = std::fs::read(dir.join(format!("{name}.in")))?;
        let answer_path = dir.join(format!("{name}.ans"));
        let expected = std::fs::read(&answer_path).map_err(|e| {
            StageError::Io(std::io::Error::new(
                e.kind(),
                format!("missing answer file '{}': {e}", answer_path.display()),
            ))
        })?;
        cases.push(TestCase::new(name, input, expected, time_limit).with_comparator(comparator));
    }

    Ok(cases)
}

/// Keep test-directory names safe regardless of what the provider calls
/// its cases
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
