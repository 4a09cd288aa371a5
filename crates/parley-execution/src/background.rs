//! Detached side effects.
//!
//! Realtime fan-out and transcript indexing must never block or fail the
//! state transition that triggered them. They are submitted here as labelled
//! jobs; a failing job is logged with its session and turn and forwarded to
//! the failure channel, nothing else.

use serde::Serialize;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

/// Correlation data carried by every detached job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobContext {
    pub session_id: String,
    pub turn_id: String,
}

impl JobContext {
    pub fn new(session_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.into(),
        }
    }
}

/// A job that returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub label: String,
    pub context: JobContext,
    pub error: String,
}

/// Runs detached jobs on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct BackgroundExecutor {
    tracker: TaskTracker,
    failures: mpsc::UnboundedSender<JobFailure>,
}

impl BackgroundExecutor {
    /// Creates an executor and the receiving end of its failure channel.
    ///
    /// Dropping the receiver is fine; failures are still logged.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobFailure>) {
        let (failures, receiver) = mpsc::unbounded_channel();
        (
            Self {
                tracker: TaskTracker::new(),
                failures,
            },
            receiver,
        )
    }

    /// Spawns `job`. Must be called from within a tokio runtime.
    pub fn submit<F>(&self, label: &'static str, context: JobContext, job: F)
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let failures = self.failures.clone();
        self.tracker.spawn(async move {
            if let Err(error) = job.await {
                tracing::error!(
                    target: "background",
                    job = label,
                    session_id = %context.session_id,
                    turn_id = %context.turn_id,
                    error = %error,
                    "detached job failed"
                );
                let _ = failures.send(JobFailure {
                    label: label.to_string(),
                    context,
                    error,
                });
            }
        });
    }

    /// Number of jobs still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every job submitted so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
