//! FIFO queue core shared by both throttle variants.
//!
//! Entries are type-erased jobs appended in submission order. At most one
//! dispatch timer is pending at a time; its delay is computed from the
//! [`AdmissionPolicy`](super::AdmissionPolicy) when the timer is scheduled,
//! not re-evaluated for entries cancelled in the meantime. When the timer
//! fires, cancelled placeholders are discarded, the first live entry is
//! started in its own task, and a new timer is scheduled while entries
//! remain.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::policy::{AdmissionPolicy, FixedInterval, SlidingWindow};

/// Errors resolving a queued action's handle without a normal result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThrottleError {
    /// The entry was cancelled before dispatch; the action never ran.
    #[error("queued action was cancelled before dispatch")]
    Cancelled,

    /// The action panicked. The panic is contained by the queue and delivered
    /// here; later entries dispatch unaffected.
    #[error("queued action panicked: {message}")]
    Panicked {
        /// The panic payload, when it was a string.
        message: String,
    },
}

/// Result type for queued actions.
pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// A dispatched job: runs the action and resolves its handle.
type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Resolves a handle with [`ThrottleError::Cancelled`].
type CancelFn = Box<dyn FnOnce() + Send>;

struct Entry {
    seq: u64,
    /// `None` once the entry is done (dispatched or cancelled). A cancelled
    /// entry keeps its slot in the FIFO as a placeholder until the dispatch
    /// scan reaches it.
    job: Option<Job>,
    on_cancel: Option<CancelFn>,
}

impl Entry {
    fn is_done(&self) -> bool {
        self.job.is_none()
    }
}

struct QueueState<P> {
    entries: VecDeque<Entry>,
    policy: P,
    timer_pending: bool,
    next_seq: u64,
}

/// An order-preserving queue that starts actions no faster than its admission
/// policy allows.
///
/// Cloning the queue is cheap and yields another producer for the same FIFO.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use paceline_core::throttle::ThrottleQueue;
///
/// # async fn example() {
/// let queue = ThrottleQueue::fixed(Duration::from_millis(100));
/// let first = queue.enqueue(|| async { "a" });
/// let second = queue.enqueue(|| async { "b" });
///
/// assert_eq!(first.await.ok(), Some("a"));
/// // `second` starts no less than 100ms after `first`.
/// assert_eq!(second.await.ok(), Some("b"));
/// # }
/// ```
pub struct ThrottleQueue<P: AdmissionPolicy> {
    state: Arc<Mutex<QueueState<P>>>,
}

impl ThrottleQueue<FixedInterval> {
    /// Create a single-slot queue: successive starts at least `interval`
    /// apart, the first with zero delay.
    pub fn fixed(interval: Duration) -> Self {
        Self::with_policy(FixedInterval::new(interval))
    }
}

impl ThrottleQueue<SlidingWindow> {
    /// Create a sliding-window queue: at most `limit` starts within any
    /// trailing window of `period`.
    pub fn sliding(limit: usize, period: Duration) -> Self {
        Self::with_policy(SlidingWindow::new(limit, period))
    }
}

impl<P: AdmissionPolicy> ThrottleQueue<P> {
    /// Create a queue around an arbitrary admission policy.
    pub fn with_policy(policy: P) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                entries: VecDeque::new(),
                policy,
                timer_pending: false,
                next_seq: 0,
            })),
        }
    }

    /// Append an action to the queue and return its handle.
    ///
    /// The action is invoked only when the queue dispatches it, never in the
    /// caller's stack, and runs in its own task so a slow action cannot
    /// delay later dispatches beyond what the policy requires. Panics inside
    /// the action are caught and surface as [`ThrottleError::Panicked`] on
    /// the handle.
    pub fn enqueue<F, Fut, T>(&self, action: F) -> QueueHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, outcome) = oneshot::channel::<ThrottleResult<T>>();
        // Exactly-once guard: whichever terminal path runs first takes the
        // sender out of the slot; the other finds it empty and does nothing.
        let resolve = Arc::new(Mutex::new(Some(tx)));

        let job_resolve = Arc::clone(&resolve);
        let job: Job = Box::new(move || {
            async move {
                let result =
                    std::panic::AssertUnwindSafe(async move { action().await }).catch_unwind().await;
                let outcome = result.map_err(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(message = %message, "queued action panicked");
                    ThrottleError::Panicked { message }
                });
                if let Some(tx) = job_resolve.lock().take() {
                    let _ = tx.send(outcome);
                }
            }
            .boxed()
        });

        let cancel_resolve = Arc::clone(&resolve);
        let on_cancel: CancelFn = Box::new(move || {
            if let Some(tx) = cancel_resolve.lock().take() {
                let _ = tx.send(Err(ThrottleError::Cancelled));
            }
        });

        let seq = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push_back(Entry { seq, job: Some(job), on_cancel: Some(on_cancel) });

            if !state.timer_pending {
                state.timer_pending = true;
                let delay = state.policy.next_delay(Instant::now());
                debug!(seq, ?delay, "scheduling dispatch timer");
                spawn_dispatch(Arc::clone(&self.state), delay);
            }
            seq
        };

        let weak = Arc::downgrade(&self.state);
        QueueHandle { cancel: Box::new(move || cancel_entry(&weak, seq)), outcome }
    }

    /// Number of live (not yet dispatched or cancelled) entries.
    pub fn pending(&self) -> usize {
        self.state.lock().entries.iter().filter(|entry| !entry.is_done()).count()
    }
}

impl<P: AdmissionPolicy> Clone for ThrottleQueue<P> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

/// Arrange a dispatch attempt after `delay`.
fn spawn_dispatch<P: AdmissionPolicy>(state: Arc<Mutex<QueueState<P>>>, delay: Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        dispatch_next(&state);
    });
}

/// Timer body: discard cancelled placeholders, start the first live entry,
/// and reschedule while entries remain.
fn dispatch_next<P: AdmissionPolicy>(state: &Arc<Mutex<QueueState<P>>>) {
    let job = {
        let mut guard = state.lock();
        guard.timer_pending = false;

        let job = loop {
            match guard.entries.front_mut() {
                None => break None,
                Some(entry) if entry.is_done() => {
                    let _ = guard.entries.pop_front();
                }
                Some(entry) => {
                    let job = entry.job.take();
                    let seq = entry.seq;
                    let _ = guard.entries.pop_front();
                    debug!(seq, "dispatching queued action");
                    break job;
                }
            }
        };

        if job.is_some() {
            let now = Instant::now();
            guard.policy.record_dispatch(now);
            if !guard.entries.is_empty() {
                guard.timer_pending = true;
                let delay = guard.policy.next_delay(now);
                spawn_dispatch(Arc::clone(state), delay);
            }
        }
        job
    };

    if let Some(job) = job {
        tokio::spawn(job());
    }
}

/// Cancel the entry `seq` if it is still queued and live.
fn cancel_entry<P: AdmissionPolicy>(state: &Weak<Mutex<QueueState<P>>>, seq: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let on_cancel = {
        let mut guard = state.lock();
        guard.entries.iter_mut().find(|entry| entry.seq == seq).and_then(|entry| {
            entry.job = None;
            entry.on_cancel.take()
        })
    };
    // Resolve outside the lock; the receiver wakes asynchronously.
    if let Some(on_cancel) = on_cancel {
        debug!(seq, "queued action cancelled before dispatch");
        on_cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// Handle to one queued action.
///
/// Await the handle (it implements [`Future`], also through `&mut`) for the
/// exactly-once outcome. [`cancel`](Self::cancel) prevents execution only if
/// the entry has not been dispatched yet; afterwards it is a no-op.
pub struct QueueHandle<T> {
    cancel: Box<dyn Fn() + Send + Sync>,
    outcome: oneshot::Receiver<ThrottleResult<T>>,
}

impl<T> QueueHandle<T> {
    /// Cancel the entry if it has not been dispatched. Idempotent.
    ///
    /// A cancelled entry keeps its position in the FIFO as a placeholder, so
    /// the wait already computed for the pending timer is unaffected; its
    /// handle resolves with [`ThrottleError::Cancelled`].
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl<T> Future for QueueHandle<T> {
    type Output = ThrottleResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Only reachable if the runtime tore the dispatch task down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ThrottleError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for QueueHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle").finish_non_exhaustive()
    }
}
