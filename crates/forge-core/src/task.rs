//! Task execution.
//!
//! A [`Task`] is the smallest unit of work a rule performs: copying files,
//! converting an asset, invoking a compiler. Tasks are shipped to a worker
//! tier, so they must be self-contained — owned data in, a serializable
//! value out, no reaching back into driver state.
//!
//! [`TaskExecutor`] is the pool abstraction: submission returns a
//! [`Deferred`] that resolves with the task's value or captured error. The
//! in-process variant here runs tasks inline, which keeps single-job builds
//! and tests simple; the pooled variant lives in the runtime crate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::deferred::Deferred;
use crate::error::{BuildReason, BuildResult, err};

/// Result payload of a task, marshalled back from the worker tier.
pub type TaskValue = serde_json::Value;

pub trait Task: Send + 'static {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Execute the task. Runs on a worker; must not touch shared state.
    fn run(self: Box<Self>) -> BuildResult<TaskValue>;
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Schedule a task. The returned deferred resolves with the task's
    /// value, or fails with its captured error. Submitting after close is
    /// an error.
    fn submit(&self, task: Box<dyn Task>) -> BuildResult<Deferred<TaskValue>>;

    /// Block until every listed deferred is resolved. A test/driver aid;
    /// production drivers react to subscribers instead.
    async fn wait(&self, pending: &[Deferred<TaskValue>]);

    /// True iff any submitted task has not yet resolved.
    fn has_running(&self) -> bool;

    /// Reject further submissions. Graceful close waits for in-flight
    /// tasks; otherwise they are cancelled best-effort and queued
    /// submissions fail. A second close is an error.
    async fn close(&self, graceful: bool) -> BuildResult<()>;
}

// ---------------------------------------------------------------------------
// InProcessTaskExecutor
// ---------------------------------------------------------------------------

/// Executes tasks synchronously on `submit`; the returned deferred is
/// resolved before `submit` returns.
#[derive(Default)]
pub struct InProcessTaskExecutor {
    closed: AtomicBool,
}

impl InProcessTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskExecutor for InProcessTaskExecutor {
    fn submit(&self, task: Box<dyn Task>) -> BuildResult<Deferred<TaskValue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(err(
                BuildReason::ExecutorClosed,
                "executor has been closed and cannot run new tasks",
            ));
        }
        let deferred = Deferred::new();
        let name = task.name().to_string();
        match task.run() {
            Ok(value) => deferred.succeed(value)?,
            Err(error) => {
                log::debug!("task {name} failed: {error}");
                deferred.fail(error)?;
            }
        }
        Ok(deferred)
    }

    async fn wait(&self, pending: &[Deferred<TaskValue>]) {
        // Tasks resolve inside submit; this only confirms.
        for deferred in pending {
            deferred.wait_resolved().await;
        }
    }

    fn has_running(&self) -> bool {
        false
    }

    async fn close(&self, _graceful: bool) -> BuildResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(err(
                BuildReason::ExecutorClosed,
                "executor has already been closed",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct SquareTask(i64);

    impl Task for SquareTask {
        fn name(&self) -> &str {
            "square"
        }
        fn run(self: Box<Self>) -> BuildResult<TaskValue> {
            Ok(TaskValue::from(self.0 * self.0))
        }
    }

    struct FailTask;

    impl Task for FailTask {
        fn name(&self) -> &str {
            "fail"
        }
        fn run(self: Box<Self>) -> BuildResult<TaskValue> {
            Err(err(BuildReason::TaskFailed, "intentional"))
        }
    }

    #[tokio::test]
    async fn submit_resolves_before_returning() {
        let executor = InProcessTaskExecutor::new();
        let deferred = executor.submit(Box::new(SquareTask(4))).unwrap();
        assert!(deferred.is_resolved());
        assert_eq!(deferred.outcome().unwrap().unwrap(), TaskValue::from(16));
        assert!(!executor.has_running());
        executor.wait(&[deferred]).await;
    }

    #[tokio::test]
    async fn task_error_becomes_failure_payload() {
        let executor = InProcessTaskExecutor::new();
        let deferred = executor.submit(Box::new(FailTask)).unwrap();
        let error = deferred.outcome().unwrap().unwrap_err();
        assert!(error.to_string().contains("intentional"), "got: {error}");
    }

    #[tokio::test]
    async fn close_rejects_submissions_and_double_close() {
        let executor = InProcessTaskExecutor::new();
        executor.close(true).await.unwrap();
        assert!(executor.submit(Box::new(SquareTask(1))).is_err());
        assert!(executor.close(true).await.is_err());
    }
}
