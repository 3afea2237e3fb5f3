//! Pooled task executor — the worker tier.
//!
//! A dispatcher task receives submitted work over a channel and fans it out
//! onto the blocking pool, bounded by a semaphore sized to the worker count.
//! Task errors come back as failure payloads on the task's deferred; a
//! worker error never takes the pool down. Non-graceful close cancels the
//! dispatcher and fails everything still queued with a cancellation reason.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use forge_core::deferred::Deferred;
use forge_core::error::{BuildReason, BuildResult, err};
use forge_core::task::{Task, TaskExecutor, TaskValue};

struct WorkItem {
    task: Box<dyn Task>,
    deferred: Deferred<TaskValue>,
}

pub struct PooledTaskExecutor {
    queue_tx: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    running: Arc<AtomicUsize>,
    closed: AtomicBool,
    workers: usize,
}

impl PooledTaskExecutor {
    /// Spawn the dispatcher. `workers` bounds concurrent task execution;
    /// `None` uses the host parallelism. Must be called from within a tokio
    /// runtime.
    pub fn new(workers: Option<usize>) -> Self {
        let workers = workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1)
            })
            .max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let dispatcher = tokio::spawn(run_dispatcher(
            queue_rx,
            workers,
            cancel.clone(),
            Arc::clone(&running),
        ));
        fg_debug!(task, workers = workers, "pooled executor started");
        Self {
            queue_tx: Mutex::new(Some(queue_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            cancel,
            running,
            closed: AtomicBool::new(false),
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

#[async_trait]
impl TaskExecutor for PooledTaskExecutor {
    fn submit(&self, task: Box<dyn Task>) -> BuildResult<Deferred<TaskValue>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(err(
                BuildReason::ExecutorClosed,
                "executor has been closed and cannot run new tasks",
            ));
        }
        let deferred = Deferred::new();
        let item = WorkItem {
            task,
            deferred: deferred.clone(),
        };
        let guard = self.queue_tx.lock().unwrap_or_else(|p| p.into_inner());
        let Some(queue_tx) = guard.as_ref() else {
            return Err(err(
                BuildReason::ExecutorClosed,
                "executor has been closed and cannot run new tasks",
            ));
        };
        self.running.fetch_add(1, Ordering::SeqCst);
        if queue_tx.send(item).is_err() {
            self.running.fetch_sub(1, Ordering::SeqCst);
            return Err(err(BuildReason::ExecutorClosed, "executor dispatcher is gone"));
        }
        Ok(deferred)
    }

    async fn wait(&self, pending: &[Deferred<TaskValue>]) {
        for deferred in pending {
            deferred.wait_resolved().await;
        }
    }

    fn has_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    async fn close(&self, graceful: bool) -> BuildResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(err(
                BuildReason::ExecutorClosed,
                "executor has already been closed",
            ));
        }
        // Dropping the sender lets the dispatcher drain and exit.
        let queue_tx = self
            .queue_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        drop(queue_tx);
        if !graceful {
            self.cancel.cancel();
        }
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = dispatcher
            && let Err(e) = handle.await
        {
            fg_warn!(task, error = %e, "dispatcher join error");
        }
        fg_debug!(task, graceful = graceful, "pooled executor closed");
        Ok(())
    }
}

/// Dispatcher loop: receive work, spawn a bounded runner per item, and on
/// cancellation fail whatever is still queued.
async fn run_dispatcher(
    mut queue_rx: mpsc::UnboundedReceiver<WorkItem>,
    workers: usize,
    cancel: CancellationToken,
    running: Arc<AtomicUsize>,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut join_set = JoinSet::new();

    loop {
        tokio::select! {
            item = queue_rx.recv() => {
                let Some(WorkItem { task, deferred }) = item else {
                    // Sender dropped: graceful close. Everything already
                    // received still runs to completion below.
                    break;
                };
                let semaphore = Arc::clone(&semaphore);
                let running = Arc::clone(&running);
                let cancel = cancel.clone();
                join_set.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => {
                            Some(permit.expect("semaphore closed"))
                        }
                    };
                    match permit {
                        None => {
                            let _ = deferred.fail(err(
                                BuildReason::ExecutorClosed,
                                "task cancelled by executor close",
                            ));
                        }
                        Some(_permit) => {
                            let name = task.name().to_string();
                            let result =
                                tokio::task::spawn_blocking(move || task.run()).await;
                            match result {
                                Ok(Ok(value)) => {
                                    if let Err(e) = deferred.succeed(value) {
                                        fg_warn!(task, error = %e, "task deferred resolved twice");
                                    }
                                }
                                Ok(Err(error)) => {
                                    fg_debug!(task, name = %name, error = %error, "task failed");
                                    let _ = deferred.fail(error);
                                }
                                Err(join_error) => {
                                    fg_warn!(task, name = %name, error = %join_error, "task panicked");
                                    let _ = deferred.fail(err(
                                        BuildReason::TaskFailed,
                                        format!("task \"{name}\" panicked: {join_error}"),
                                    ));
                                }
                            }
                        }
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
            _ = cancel.cancelled() => {
                // Non-graceful close: discard queued submissions as
                // failures; in-flight runners resolve on their own.
                while let Ok(WorkItem { deferred, .. }) = queue_rx.try_recv() {
                    let _ = deferred.fail(err(
                        BuildReason::ExecutorClosed,
                        "task cancelled by executor close",
                    ));
                    running.fetch_sub(1, Ordering::SeqCst);
                }
                queue_rx.close();
                break;
            }
        }
    }

    while join_set.join_next().await.is_some() {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
