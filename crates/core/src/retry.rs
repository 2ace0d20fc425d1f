//! Retry engine with exponential backoff, jitter, and best-effort
//! cancellation.
//!
//! [`attempt`] spawns a task that repeatedly invokes an asynchronous action
//! until a success predicate holds, the action reports an error, the
//! wall-clock budget is exhausted, or the request is cancelled. Between
//! unsuccessful attempts the engine sleeps for a growing, jittered delay. The
//! budget check is conservative: a new attempt is only scheduled when its
//! earliest possible completion still fits the budget, so the engine never
//! forcibly aborts an attempt at the deadline.
//!
//! The outcome is delivered exactly once through the returned
//! [`RetryHandle`], which is also the cancellation surface. Attempts are
//! strictly sequential; no two invocations of one request ever overlap.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors that terminate a retry request.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The action failed. Action errors are terminal and never retried; only
    /// an unsuccessful-but-error-free result is.
    #[error("action failed: {source}")]
    Action {
        /// The error the action returned.
        source: E,
    },

    /// The wall-clock budget ran out before another attempt could fit.
    #[error("retry budget of {budget:?} exhausted before another attempt could fit")]
    Timeout {
        /// The configured budget that was exhausted.
        budget: Duration,
    },

    /// The request was cancelled before reaching any other terminal state.
    #[error("retry request was cancelled")]
    Cancelled,

    /// The retry configuration failed validation.
    #[error("invalid retry configuration: {message}")]
    InvalidConfig {
        /// Which constraint the configuration violated.
        message: String,
    },
}

/// Result type for retry requests.
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total wall-clock budget for the whole request.
    pub timeout: Duration,
    /// Delay before the second attempt; grows by `increment` per failed round.
    pub interval: Duration,
    /// Multiplicative delay growth factor per unsuccessful attempt.
    pub increment: f64,
    /// Symmetric fractional randomization of each delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
            interval: Duration::from_millis(500),
            increment: 1.5,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.timeout.is_zero() {
            return Err(RetryError::InvalidConfig {
                message: "timeout must be greater than zero".to_string(),
            });
        }
        if self.interval.is_zero() {
            return Err(RetryError::InvalidConfig {
                message: "interval must be greater than zero".to_string(),
            });
        }
        if self.increment < 1.0 || !self.increment.is_finite() {
            return Err(RetryError::InvalidConfig {
                message: "increment must be a finite factor >= 1.0".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(RetryError::InvalidConfig {
                message: "jitter must be within [0, 1)".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RetryConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Set the total wall-clock budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the initial delay between attempts.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the delay growth factor per unsuccessful attempt.
    pub fn increment(mut self, increment: f64) -> Self {
        self.config.increment = increment;
        self
    }

    /// Set the symmetric jitter fraction applied to each delay.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Handle to an in-flight retry request.
///
/// Await the handle (it implements [`Future`], also through `&mut`) for the
/// exactly-once outcome; call [`cancel`](Self::cancel) for best-effort
/// cancellation. Cancelling after the request reached a terminal state is a
/// no-op.
#[derive(Debug)]
pub struct RetryHandle<T, E> {
    token: CancellationToken,
    outcome: oneshot::Receiver<RetryResult<T, E>>,
}

impl<T, E> RetryHandle<T, E> {
    /// Request cancellation. Idempotent.
    ///
    /// If no attempt has started, the request resolves with
    /// [`RetryError::Cancelled`] without ever invoking the action. If an
    /// attempt is in flight, its future is dropped (the async-Rust form of
    /// forwarding cancellation to the invocation) and the request resolves
    /// with [`RetryError::Cancelled`]. Either way the outcome is still
    /// delivered exactly once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T, E> Future for RetryHandle<T, E> {
    type Output = RetryResult<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The engine task sends exactly once before exiting; a closed
            // channel only happens if the runtime tore the task down.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RetryError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Start a retry request and return its handle.
///
/// The first invocation of `action` happens inside the spawned task, never in
/// the caller's stack, so the handle can always be attached before any
/// completion fires. `is_successful` decides whether an error-free result is
/// terminal; an `Err` from the action is always terminal.
///
/// # Examples
///
/// ```rust
/// use paceline_core::retry::{attempt, RetryConfig};
///
/// # async fn example() {
/// let handle = attempt(
///     RetryConfig::default(),
///     || async { Ok::<_, std::io::Error>(2 + 2) },
///     |value| *value == 4,
/// );
/// let outcome = handle.await;
/// assert_eq!(outcome.ok(), Some(4));
/// # }
/// ```
pub fn attempt<F, Fut, T, E, P>(config: RetryConfig, action: F, is_successful: P) -> RetryHandle<T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    let token = CancellationToken::new();
    let (done, outcome) = oneshot::channel();

    let task_token = token.clone();
    tokio::spawn(async move {
        let result = run_attempts(config, action, is_successful, &task_token).await;
        // The receiver may already be gone; the request is still complete.
        let _ = done.send(result);
    });

    RetryHandle { token, outcome }
}

/// Execute a retry request to completion with the given configuration.
pub async fn retry_with_config<F, Fut, T, E, P>(
    config: RetryConfig,
    action: F,
    is_successful: P,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    attempt(config, action, is_successful).await
}

/// Execute a retry request to completion with the default configuration.
pub async fn retry<F, Fut, T, E, P>(action: F, is_successful: P) -> RetryResult<T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    retry_with_config(RetryConfig::default(), action, is_successful).await
}

/// The sequential attempt loop. Runs inside the spawned request task.
async fn run_attempts<F, Fut, T, E, P>(
    config: RetryConfig,
    mut action: F,
    is_successful: P,
    token: &CancellationToken,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut interval = config.interval;
    let mut attempts: u32 = 0;

    loop {
        // Cancellation requested before this round committed to an attempt.
        if token.is_cancelled() {
            debug!(attempts, "retry request cancelled");
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        debug!(attempt = attempts, "invoking action");

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(attempt = attempts, "retry request cancelled mid-attempt");
                return Err(RetryError::Cancelled);
            }
            result = action() => result,
        };

        match result {
            Err(source) => {
                debug!(attempt = attempts, "action reported an error, not retrying");
                return Err(RetryError::Action { source });
            }
            Ok(value) if is_successful(&value) => {
                if attempts > 1 {
                    debug!(attempts, "action succeeded after retries");
                }
                return Ok(value);
            }
            Ok(_) => {}
        }

        let wait = jittered(interval, config.jitter);
        interval = grown(interval, config.increment, config.timeout);

        if Instant::now() + wait >= deadline {
            warn!(attempts, budget = ?config.timeout, "retry budget exhausted");
            return Err(RetryError::Timeout { budget: config.timeout });
        }

        debug!(attempt = attempts, ?wait, "attempt unsuccessful, backing off");
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(attempts, "retry request cancelled during backoff");
                return Err(RetryError::Cancelled);
            }
            _ = sleep(wait) => {}
        }
    }
}

/// Grow `interval` by `factor`, saturating at `cap`.
///
/// The cap keeps large growth factors from overflowing `Duration`; a delay
/// at or beyond the whole budget already fails the deadline check, so
/// saturating there is lossless.
fn grown(interval: Duration, factor: f64, cap: Duration) -> Duration {
    let next = interval.as_secs_f64() * factor;
    if next.is_finite() && next < cap.as_secs_f64() {
        Duration::from_secs_f64(next)
    } else {
        cap
    }
}

/// Randomize `interval` uniformly within `±jitter` of its nominal value.
fn jittered(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return interval;
    }
    let spread = jitter * (2.0 * rand::thread_rng().gen::<f64>() - 1.0);
    interval.mul_f64((1.0 + spread).max(0.0))
}
