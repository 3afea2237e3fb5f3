//! One-shot completion cell.
//!
//! A [`Deferred`] tracks a single operation's outcome: pending, then exactly
//! one transition to succeeded (with a payload) or failed (with a
//! [`BuildError`]). Subscribers registered before resolution fire at
//! resolution time in registration order; subscribers registered after fire
//! immediately with the stored outcome. Success and failure subscriber lists
//! are distinct — only the matching list fires.
//!
//! Handles are cheap clones of shared state and may be resolved from worker
//! tasks while the driver awaits them.

use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{BuildError, BuildReason, BuildResult, err};

type SuccessFn<T> = Box<dyn FnOnce(&T) + Send>;
type FailureFn = Box<dyn FnOnce(&BuildError) + Send>;

enum State<T> {
    Pending {
        on_success: Vec<SuccessFn<T>>,
        on_failure: Vec<FailureFn>,
    },
    Succeeded(T),
    Failed(BuildError),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    // Held so `changed()` on waiter clones never observes a closed channel.
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    on_success: Vec::new(),
                    on_failure: Vec::new(),
                }),
                done_tx,
                done_rx,
            }),
        }
    }

    /// Whether the deferred has completed (either succeeded or failed).
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.lock(), State::Pending { .. })
    }

    /// Register a function called with the payload when the deferred
    /// succeeds. Fires immediately if the deferred already succeeded; is
    /// dropped unfired if it already failed.
    pub fn on_success(&self, f: impl FnOnce(&T) + Send + 'static) {
        let stored = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { on_success, .. } => {
                    on_success.push(Box::new(f));
                    return;
                }
                State::Succeeded(value) => Some(value.clone()),
                State::Failed(_) => None,
            }
        };
        if let Some(value) = stored {
            f(&value);
        }
    }

    /// Register a function called with the error when the deferred fails.
    /// Fires immediately if the deferred already failed; is dropped unfired
    /// if it already succeeded.
    pub fn on_failure(&self, f: impl FnOnce(&BuildError) + Send + 'static) {
        let stored = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending { on_failure, .. } => {
                    on_failure.push(Box::new(f));
                    return;
                }
                State::Succeeded(_) => None,
                State::Failed(error) => Some(error.clone()),
            }
        };
        if let Some(error) = stored {
            f(&error);
        }
    }

    /// Complete successfully and fire registered success subscribers.
    /// A second terminal transition is a programming error.
    pub fn succeed(&self, value: T) -> BuildResult<()> {
        let callbacks = {
            let mut state = self.lock();
            if !matches!(*state, State::Pending { .. }) {
                return Err(err(BuildReason::Programming, "deferred already resolved"));
            }
            let old = mem::replace(&mut *state, State::Succeeded(value.clone()));
            match old {
                State::Pending { on_success, .. } => on_success,
                _ => unreachable!(),
            }
        };
        for callback in callbacks {
            callback(&value);
        }
        self.inner.done_tx.send_replace(true);
        Ok(())
    }

    /// Complete with an error and fire registered failure subscribers.
    /// A second terminal transition is a programming error.
    pub fn fail(&self, error: BuildError) -> BuildResult<()> {
        let callbacks = {
            let mut state = self.lock();
            if !matches!(*state, State::Pending { .. }) {
                return Err(err(BuildReason::Programming, "deferred already resolved"));
            }
            let old = mem::replace(&mut *state, State::Failed(error.clone()));
            match old {
                State::Pending { on_failure, .. } => on_failure,
                _ => unreachable!(),
            }
        };
        for callback in callbacks {
            callback(&error);
        }
        self.inner.done_tx.send_replace(true);
        Ok(())
    }

    /// The stored outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, BuildError>> {
        match &*self.lock() {
            State::Pending { .. } => None,
            State::Succeeded(value) => Some(Ok(value.clone())),
            State::Failed(error) => Some(Err(error.clone())),
        }
    }

    /// Await resolution and return the outcome.
    pub async fn wait(&self) -> Result<T, BuildError> {
        let mut done = self.inner.done_rx.clone();
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            // Sender lives inside `inner`, so the channel cannot close while
            // this handle exists.
            let _ = done.changed().await;
        }
    }

    /// Await resolution, discarding the outcome.
    pub async fn wait_resolved(&self) {
        let mut done = self.inner.done_rx.clone();
        loop {
            if self.is_resolved() {
                return;
            }
            let _ = done.changed().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// gather — combine a set of deferreds into one
// ---------------------------------------------------------------------------

struct GatherState<T> {
    slots: Vec<Option<T>>,
    pending: usize,
    failures: Vec<(usize, BuildError)>,
}

enum Finish<T> {
    Ok(Vec<T>),
    Err(BuildError),
}

/// Combine deferreds into one that succeeds with all payloads (in input
/// order) once every input succeeds.
///
/// With `fail_fast`, the first input failure fails the combined deferred
/// immediately; otherwise all inputs are awaited and the combined deferred
/// fails with a summary of the failures.
pub fn gather<T>(deferreds: &[Deferred<T>], fail_fast: bool) -> Deferred<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let combined = Deferred::new();
    let count = deferreds.len();
    if count == 0 {
        let _ = combined.succeed(Vec::new());
        return combined;
    }

    let state = Arc::new(Mutex::new(GatherState {
        slots: (0..count).map(|_| None).collect(),
        pending: count,
        failures: Vec::new(),
    }));

    for (index, deferred) in deferreds.iter().enumerate() {
        let on_ok = {
            let state = Arc::clone(&state);
            let combined = combined.clone();
            move |value: &T| {
                let finish = {
                    let mut s = state.lock().unwrap_or_else(|p| p.into_inner());
                    s.slots[index] = Some(value.clone());
                    s.pending -= 1;
                    finish_if_done(&mut s)
                };
                apply_finish(&combined, finish);
            }
        };
        deferred.on_success(on_ok);

        let on_err = {
            let state = Arc::clone(&state);
            let combined = combined.clone();
            move |error: &BuildError| {
                if fail_fast {
                    // Later failures (and stragglers) are ignored.
                    if !combined.is_resolved() {
                        let _ = combined.fail(error.clone());
                    }
                    return;
                }
                let finish = {
                    let mut s = state.lock().unwrap_or_else(|p| p.into_inner());
                    s.failures.push((index, error.clone()));
                    s.pending -= 1;
                    finish_if_done(&mut s)
                };
                apply_finish(&combined, finish);
            }
        };
        deferred.on_failure(on_err);
    }

    combined
}

fn finish_if_done<T>(s: &mut GatherState<T>) -> Option<Finish<T>> {
    if s.pending != 0 {
        return None;
    }
    if s.failures.is_empty() {
        let values = mem::take(&mut s.slots).into_iter().flatten().collect();
        Some(Finish::Ok(values))
    } else {
        let (first_index, first_error) = &s.failures[0];
        Some(Finish::Err(err(
            BuildReason::TaskFailed,
            format!(
                "{} of {} gathered deferreds failed; first (input {}): {}",
                s.failures.len(),
                s.slots.len(),
                first_index,
                first_error,
            ),
        )))
    }
}

fn apply_finish<T>(combined: &Deferred<Vec<T>>, finish: Option<Finish<T>>)
where
    T: Clone + Send + 'static,
{
    match finish {
        // A fail-fast resolution may already have claimed the combined
        // deferred, so late finishes are dropped.
        Some(Finish::Ok(values)) => {
            if !combined.is_resolved() {
                let _ = combined.succeed(values);
            }
        }
        Some(Finish::Err(error)) => {
            if !combined.is_resolved() {
                let _ = combined.fail(error);
            }
        }
        None => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use orion_error::StructErrorTrait;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let c = Arc::new(AtomicUsize::new(0));
        let read = {
            let c = Arc::clone(&c);
            move || c.load(Ordering::SeqCst)
        };
        (c, read)
    }

    #[test]
    fn starts_pending() {
        let d: Deferred<u32> = Deferred::new();
        assert!(!d.is_resolved());
        assert!(d.outcome().is_none());
    }

    #[test]
    fn subscriber_before_resolution_fires_at_resolution() {
        let d: Deferred<u32> = Deferred::new();
        let (c, read) = counter();
        d.on_success(move |v| {
            c.fetch_add(*v as usize, Ordering::SeqCst);
        });
        assert_eq!(read(), 0);
        d.succeed(7).unwrap();
        assert_eq!(read(), 7);
        assert!(d.is_resolved());
    }

    #[test]
    fn subscriber_after_resolution_fires_immediately_with_same_args() {
        let d: Deferred<u32> = Deferred::new();
        d.succeed(7).unwrap();
        let (c, read) = counter();
        d.on_success(move |v| {
            c.fetch_add(*v as usize, Ordering::SeqCst);
        });
        assert_eq!(read(), 7);
    }

    #[test]
    fn failure_subscribers_skipped_on_success_and_vice_versa() {
        let d: Deferred<u32> = Deferred::new();
        let (ok, read_ok) = counter();
        let (bad, read_bad) = counter();
        d.on_success(move |_| {
            ok.fetch_add(1, Ordering::SeqCst);
        });
        d.on_failure(move |_| {
            bad.fetch_add(1, Ordering::SeqCst);
        });
        d.succeed(1).unwrap();
        assert_eq!(read_ok(), 1);
        assert_eq!(read_bad(), 0);

        let d: Deferred<u32> = Deferred::new();
        let (ok, read_ok) = counter();
        let (bad, read_bad) = counter();
        d.on_success(move |_| {
            ok.fetch_add(1, Ordering::SeqCst);
        });
        d.on_failure(move |_| {
            bad.fetch_add(1, Ordering::SeqCst);
        });
        d.fail(err(BuildReason::TaskFailed, "boom")).unwrap();
        assert_eq!(read_ok(), 0);
        assert_eq!(read_bad(), 1);
    }

    #[test]
    fn subscribers_fire_in_registration_order() {
        let d: Deferred<u32> = Deferred::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            d.on_success(move |_| order.lock().unwrap().push(i));
        }
        d.succeed(0).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn second_resolution_is_programming_error() {
        let d: Deferred<u32> = Deferred::new();
        d.succeed(1).unwrap();
        let e = d.succeed(2).unwrap_err();
        assert_eq!(*e.get_reason(), BuildReason::Programming);
        assert!(d.fail(err(BuildReason::TaskFailed, "late")).is_err());
        // The stored outcome is untouched.
        assert_eq!(d.outcome().unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn wait_returns_outcome() {
        let d: Deferred<u32> = Deferred::new();
        let waiter = d.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        d.succeed(42).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn wait_on_already_resolved() {
        let d: Deferred<u32> = Deferred::new();
        d.fail(err(BuildReason::TaskFailed, "boom")).unwrap();
        assert!(d.wait().await.is_err());
        d.wait_resolved().await;
    }

    #[test]
    fn gather_empty_succeeds_immediately() {
        let combined: Deferred<Vec<u32>> = gather(&[], true);
        assert_eq!(combined.outcome().unwrap().unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn gather_collects_in_input_order() {
        let a: Deferred<u32> = Deferred::new();
        let b: Deferred<u32> = Deferred::new();
        let combined = gather(&[a.clone(), b.clone()], true);
        // Resolve out of order; payloads still land in input order.
        b.succeed(2).unwrap();
        assert!(!combined.is_resolved());
        a.succeed(1).unwrap();
        assert_eq!(combined.outcome().unwrap().unwrap(), vec![1, 2]);
    }

    #[test]
    fn gather_fail_fast_fails_on_first_failure() {
        let a: Deferred<u32> = Deferred::new();
        let b: Deferred<u32> = Deferred::new();
        let combined = gather(&[a.clone(), b.clone()], true);
        a.fail(err(BuildReason::TaskFailed, "first")).unwrap();
        assert!(combined.outcome().unwrap().is_err());
        // The straggler resolving later is ignored.
        b.succeed(2).unwrap();
        assert!(combined.outcome().unwrap().is_err());
    }

    #[test]
    fn gather_without_fail_fast_succeeds_when_all_do() {
        let a: Deferred<u32> = Deferred::new();
        let b: Deferred<u32> = Deferred::new();
        let combined = gather(&[a.clone(), b.clone()], false);
        a.succeed(1).unwrap();
        b.succeed(2).unwrap();
        assert_eq!(combined.outcome().unwrap().unwrap(), vec![1, 2]);
    }

    #[test]
    fn gather_without_fail_fast_waits_for_all() {
        let a: Deferred<u32> = Deferred::new();
        let b: Deferred<u32> = Deferred::new();
        let combined = gather(&[a.clone(), b.clone()], false);
        a.fail(err(BuildReason::TaskFailed, "boom")).unwrap();
        assert!(!combined.is_resolved());
        b.succeed(2).unwrap();
        let error = combined.outcome().unwrap().unwrap_err();
        assert!(error.to_string().contains("1 of 2"), "got: {error}");
    }
}
