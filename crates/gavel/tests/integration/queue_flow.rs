use std::sync::Arc;
use std::time::Duration;

use gavel::{
    ComparatorKind, JudgePipeline, TestCase, VERDICT_RECORD, Verdict, WorkerPool, cancel_pair,
};

use super::test_config;

/// Find a finished verdict record for the given submission id
fn recorded_verdict(judge_dir: &std::path::Path, id: &str) -> Option<Verdict> {
    let prefix = format!("{id}-");
    for entry in std::fs::read_dir(judge_dir).ok()? {
        let entry = entry.ok()?;
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let record = entry.path().join(VERDICT_RECORD);
        let bytes = std::fs::read(&record).ok()?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let verdict = value.get("verdict")?.clone();
        return serde_json::from_value(verdict).ok();
    }
    None
}

#[tokio::test]
async fn daemon_claims_judges_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let incoming = config.incoming_dir.clone();
    let submit = config.submit_dir.clone();
    let judge_dir = config.judge_dir.clone();

    std::fs::create_dir_all(&incoming).unwrap();
    std::fs::write(incoming.join("s1.shell"), b"cat").unwrap();

    let pipeline = JudgePipeline::new(config).unwrap();
    let pool = WorkerPool::new(pipeline);

    let tests = Arc::new(vec![
        TestCase::new("01", b"hi\n".to_vec(), b"hi\n".to_vec(), 2)
            .with_comparator(ComparatorKind::Line),
    ]);

    let (handle, token) = cancel_pair();
    let running = tokio::spawn(async move { pool.run(tests, token).await });

    // Wait for the worker to claim and finish the submission
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    let verdict = loop {
        if let Some(verdict) = recorded_verdict(&judge_dir, "s1") {
            break verdict;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "submission was never judged"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    handle.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(verdict, Verdict::Correct);
    // The claim moved the file out of incoming
    assert!(!incoming.join("s1.shell").exists());
    assert!(submit.join("s1.shell").exists());
}

#[tokio::test]
async fn unreadable_submission_is_flagged_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let incoming = config.incoming_dir.clone();
    let submit = config.submit_dir.clone();

    std::fs::create_dir_all(&incoming).unwrap();
    // No language suffix: the queue cannot parse this
    std::fs::write(incoming.join("garbage"), b"???").unwrap();

    let pipeline = JudgePipeline::new(config).unwrap();
    let pool = WorkerPool::new(pipeline);

    let (handle, token) = cancel_pair();
    let running = tokio::spawn(async move { pool.run(Arc::new(Vec::new()), token).await });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        if submit.join("garbage.attention").exists() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "submission was never flagged"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    handle.cancel();
    running.await.unwrap().unwrap();

    assert!(!incoming.join("garbage").exists());
}
