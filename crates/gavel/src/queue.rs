//! Submission intake queue and worker pool
//!
//! Intake drops submissions into the incoming directory; claiming one is an
//! atomic rename into the submissions directory, so exactly one worker owns
//! each submission even with concurrent pollers — losers of the race see
//! `NotFound` and move on. Workers are independent: no ordering guarantee
//! exists across submissions, and no in-process state is shared.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::pipeline::{JudgeError, JudgePipeline, JudgeRequest};
use crate::stages::TestCase;
use crate::submission::Submission;

/// The filesystem handoff between intake and the pipeline
#[derive(Debug, Clone)]
pub struct IncomingQueue {
    incoming: PathBuf,
    submit: PathBuf,
}

/// A submission this worker has exclusively claimed
#[derive(Debug)]
pub struct ClaimedSubmission {
    pub path: PathBuf,
}

impl IncomingQueue {
    pub fn new(incoming: impl Into<PathBuf>, submit: impl Into<PathBuf>) -> Self {
        Self {
            incoming: incoming.into(),
            submit: submit.into(),
        }
    }

    /// Create both queue directories if they do not exist yet
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.incoming)?;
        std::fs::create_dir_all(&self.submit)?;
        Ok(())
    }

    /// Claim the lexicographically first waiting submission.
    ///
    /// The rename is the claim: it either fully succeeds for one worker or
    /// fails with `NotFound` for everyone who lost the race.
    #[instrument(skip(self))]
    pub fn claim_next(&self) -> std::io::Result<Option<ClaimedSubmission>> {
        let entries = match std::fs::read_dir(&self.incoming) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let is_file = entry.file_type().ok()?.is_file();
                is_file
                    .then(|| entry.file_name().to_str().map(str::to_string))
                    .flatten()
            })
            .collect();
        names.sort();

        for name in names {
            let source = self.incoming.join(&name);
            let target = self.submit.join(&name);
            match std::fs::rename(&source, &target) {
                Ok(()) => {
                    debug!(submission = %name, "claimed");
                    return Ok(Some(ClaimedSubmission { path: target }));
                }
                // Another worker won this one; try the next
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Flag a claimed submission for operator attention.
    ///
    /// The file stays in the submissions directory under an `.attention`
    /// suffix; it is never re-queued automatically, so a poisoned
    /// submission cannot retry-storm the pool.
    pub fn flag_attention(&self, claimed: &ClaimedSubmission) -> std::io::Result<PathBuf> {
        let file_name = claimed
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        let flagged = self.submit.join(format!("{file_name}.attention"));
        std::fs::rename(&claimed.path, &flagged)?;
        Ok(flagged)
    }
}

/// Fixed-size pool of judging workers over the incoming directory.
///
/// Each worker owns at most one claimed submission at a time and drives its
/// whole judging run; workers block only inside the sandbox, bounded by the
/// applicable budget.
#[derive(Debug)]
pub struct WorkerPool {
    pipeline: JudgePipeline,
    queue: IncomingQueue,
}

impl WorkerPool {
    pub fn new(pipeline: JudgePipeline) -> Self {
        let config = pipeline.config();
        let queue = IncomingQueue::new(&config.incoming_dir, &config.submit_dir);
        Self { pipeline, queue }
    }

    /// Run the configured number of workers until cancelled
    pub async fn run(
        &self,
        tests: Arc<Vec<TestCase>>,
        cancel: CancelToken,
    ) -> std::io::Result<()> {
        self.queue.ensure_dirs()?;

        let workers = self.pipeline.config().workers;
        info!(workers, "worker pool starting");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let pipeline = self.pipeline.clone();
            let queue = self.queue.clone();
            let tests = Arc::clone(&tests);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker, pipeline, queue, tests, cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task failed");
            }
        }

        info!("worker pool stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: JudgePipeline,
    queue: IncomingQueue,
    tests: Arc<Vec<TestCase>>,
    cancel: CancelToken,
) {
    let poll_interval = Duration::from_millis(pipeline.config().poll_interval_ms);

    loop {
        if cancel.is_cancelled() {
            debug!(worker, "worker stopping");
            return;
        }

        let claimed = match queue.claim_next() {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(worker, error = %e, "queue scan failed");
                None
            }
        };

        match claimed {
            Some(claimed) => {
                process_claimed(worker, &pipeline, &queue, claimed, &tests, &cancel).await;
            }
            None => {
                let mut cancel_wait = cancel.clone();
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel_wait.cancelled() => {}
                }
            }
        }
    }
}

async fn process_claimed(
    worker: usize,
    pipeline: &JudgePipeline,
    queue: &IncomingQueue,
    claimed: ClaimedSubmission,
    tests: &Arc<Vec<TestCase>>,
    cancel: &CancelToken,
) {
    let submission = match Submission::from_queue_file(&claimed.path) {
        Ok(submission) => submission,
        Err(e) => {
            error!(worker, path = %claimed.path.display(), error = %e, "unreadable submission");
            if let Err(e) = queue.flag_attention(&claimed) {
                error!(worker, error = %e, "could not flag submission");
            }
            return;
        }
    };

    let result = pipeline
        .judge(JudgeRequest {
            submission: &submission,
            tests: tests.as_slice(),
            rejudge: false,
            cancel: Some(cancel.clone()),
        })
        .await;

    match result {
        Ok(run) => {
            info!(
                worker,
                submission = submission.id(),
                verdict = %run.verdict().map(|v| v.to_string()).unwrap_or_default(),
                "judging finished"
            );
        }
        Err(JudgeError::AlreadyJudged { id, verdict }) => {
            info!(worker, submission = %id, %verdict, "verdict already recorded");
        }
        Err(JudgeError::Cancelled) => {
            info!(worker, submission = submission.id(), "judging cancelled");
        }
        Err(e @ (JudgeError::Rejected(_) | JudgeError::Config(_))) => {
            error!(worker, submission = submission.id(), error = %e, "submission cannot be judged");
            if let Err(e) = queue.flag_attention(&claimed) {
                error!(worker, error = %e, "could not flag submission");
            }
        }
        Err(e) => {
            error!(worker, submission = submission.id(), error = %e, "judging failed, needs attention");
            if let Err(e) = queue.flag_attention(&claimed) {
                error!(worker, error = %e, "could not flag submission");
            }
        }
    }
}
