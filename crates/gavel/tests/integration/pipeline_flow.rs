use std::time::{Duration, Instant};

use gavel::{
    ComparatorKind, JudgeError, JudgePipeline, JudgeRequest, RunState, Submission, TestCase,
    Verdict, cancel_pair,
};

use super::test_config;

fn pipeline(root: &std::path::Path) -> JudgePipeline {
    JudgePipeline::new(test_config(root)).expect("pipeline must initialize")
}

fn shell_submission(id: &str, script: &str) -> Submission {
    Submission::new(id, script.as_bytes().to_vec(), "shell", None)
}

fn case(name: &str, input: &str, expected: &str) -> TestCase {
    TestCase::new(name, input.as_bytes().to_vec(), expected.as_bytes().to_vec(), 1)
        .with_comparator(ComparatorKind::Line)
}

async fn judge(
    pipeline: &JudgePipeline,
    submission: &Submission,
    tests: &[TestCase],
    rejudge: bool,
) -> Result<gavel::JudgingRun, JudgeError> {
    pipeline
        .judge(JudgeRequest {
            submission,
            tests,
            rejudge,
            cancel: None,
        })
        .await
}

/// A program that echoes its input back: correct whenever expected == input
const CAT: &str = "cat";

/// Answers depend on the input: "slow" hangs, anything else is wrong
const WRONG_OR_SLOW: &str = r#"read line
if [ "$line" = "slow" ]; then sleep 30; else echo mismatch; fi
"#;

#[tokio::test]
async fn all_test_cases_pass_yields_correct() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("ok1", CAT);

    let tests: Vec<TestCase> = (1..=5)
        .map(|i| case(&format!("{i:02}"), &format!("{i}\n"), &format!("{i}\n")))
        .collect();

    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();

    assert_eq!(run.verdict(), Some(Verdict::Correct));
    assert_eq!(run.state(), RunState::Aggregated);
    assert_eq!(run.tests().len(), 5);
    assert!(run.tests().iter().all(|t| t.verdict == Verdict::Correct));
}

#[tokio::test]
async fn wrong_answer_before_timelimit_aggregates_to_wrong_answer() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("order1", WRONG_OR_SLOW);

    let tests = vec![
        case("01-fast", "fast\n", "right\n"),
        case("02-slow", "slow\n", "right\n"),
    ];

    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();

    assert_eq!(run.tests()[0].verdict, Verdict::WrongAnswer);
    assert_eq!(run.tests()[1].verdict, Verdict::TimeLimitExceeded);
    // Case order decides, not severity
    assert_eq!(run.verdict(), Some(Verdict::WrongAnswer));
}

#[tokio::test]
async fn timelimit_before_wrong_answer_aggregates_to_timelimit() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("order2", WRONG_OR_SLOW);

    let tests = vec![
        case("01-slow", "slow\n", "right\n"),
        case("02-fast", "fast\n", "right\n"),
    ];

    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();

    assert_eq!(run.tests()[0].verdict, Verdict::TimeLimitExceeded);
    assert_eq!(run.tests()[1].verdict, Verdict::WrongAnswer);
    assert_eq!(run.verdict(), Some(Verdict::TimeLimitExceeded));
}

#[tokio::test]
async fn compiled_language_runs_the_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = Submission::new(
        "shc1",
        b"#!/bin/sh\ncat\n".to_vec(),
        "shc",
        Some("team-7".to_string()),
    );

    let tests = vec![case("01", "hello\n", "hello\n")];
    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();

    assert_eq!(run.verdict(), Some(Verdict::Correct));
    // Compile stage artifacts live in the workspace root
    assert!(run.workspace().join("main").exists());
}

#[tokio::test]
async fn compile_diagnostics_are_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = Submission::new("bad1", b"whatever\n".to_vec(), "badc", None);

    let tests = vec![case("01", "x\n", "x\n")];
    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();

    assert_eq!(run.verdict(), Some(Verdict::CompileError));
    assert!(run.state().is_terminal());
    // No run stage may follow a failed compile
    assert!(run.tests().is_empty());
    assert!(run.compile_diagnostics().unwrap().contains("boom"));
}

#[tokio::test]
async fn hanging_compiler_is_cut_at_the_compile_budget() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    // The slowc "toolchain" sleeps 40 s; compile_time is 2 s
    let submission = Submission::new("slow1", b"whatever\n".to_vec(), "slowc", None);

    let started = Instant::now();
    let run = judge(&pipeline, &submission, &[], false).await.unwrap();

    assert_eq!(run.verdict(), Some(Verdict::CompileTimeLimitExceeded));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "compile must be cut at the budget, not at the toolchain's leisure"
    );
}

#[tokio::test]
async fn replaying_a_submission_yields_the_same_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("replay1", WRONG_OR_SLOW);
    let tests = vec![case("01-fast", "fast\n", "right\n")];

    let first = judge(&pipeline, &submission, &tests, false).await.unwrap();
    let second = judge(&pipeline, &submission, &tests, true).await.unwrap();

    assert_eq!(first.verdict(), second.verdict());
    assert_ne!(first.workspace(), second.workspace());
}

#[tokio::test]
async fn recorded_verdict_blocks_silent_rejudging() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("once1", CAT);
    let tests = vec![case("01", "a\n", "a\n")];

    let first = judge(&pipeline, &submission, &tests, false).await.unwrap();
    assert_eq!(first.verdict(), Some(Verdict::Correct));

    let second = judge(&pipeline, &submission, &tests, false).await;
    match second {
        Err(JudgeError::AlreadyJudged { id, verdict }) => {
            assert_eq!(id, "once1");
            assert_eq!(verdict, Verdict::Correct);
        }
        other => panic!("expected AlreadyJudged, got {other:?}"),
    }
}

#[tokio::test]
async fn workspace_holds_source_captures_and_record() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("layout1", CAT);
    let tests = vec![case("01", "a\n", "a\n")];

    let run = judge(&pipeline, &submission, &tests, false).await.unwrap();
    let workspace = run.workspace();

    assert!(workspace.join("main.sh").exists(), "staged source");
    assert!(workspace.join(gavel::VERDICT_RECORD).exists(), "record");
    assert!(workspace.join("t000-01/stdout.txt").exists(), "capture");
    assert!(workspace.join("t000-01/stdin.txt").exists(), "input");
}

#[tokio::test]
async fn cancellation_aborts_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path());
    let submission = shell_submission("cancel1", "sleep 30");
    let tests = vec![TestCase::new("01", Vec::new(), Vec::new(), 10)];

    let (handle, token) = cancel_pair();
    let started = Instant::now();

    let judging = tokio::spawn({
        let pipeline = pipeline.clone();
        let submission = submission.clone();
        async move {
            pipeline
                .judge(JudgeRequest {
                    submission: &submission,
                    tests: &tests,
                    rejudge: false,
                    cancel: Some(token),
                })
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();

    let result = judging.await.unwrap();
    assert!(matches!(result, Err(JudgeError::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancel must kill the sandboxed group, not wait for it"
    );
}
