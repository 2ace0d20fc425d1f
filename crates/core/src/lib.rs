//! Rate-aware execution primitives for asynchronous actions.
//!
//! This crate is a small scheduling substrate with two engines:
//!
//! - [`retry`](mod@retry): repeat a fallible action with exponential backoff
//!   and jitter until it succeeds, errors, times out, or is cancelled.
//! - [`throttle`]: admit queued actions at a bounded rate (a fixed interval
//!   between starts, or a sliding window bounding how many starts fit in any
//!   trailing period) while preserving submission order.
//!
//! The two compose freely: a retrying action can be enqueued on a throttle
//! queue, and a throttled action can be retried, without either engine knowing
//! about the other. The crate performs no I/O of its own; actions are plain
//! closures returning futures, supplied by the caller.
//!
//! All timing goes through [`tokio::time`], so tests drive every engine
//! deterministically under the paused clock
//! (`#[tokio::test(start_paused = true)]`).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod collections;
pub mod retry;
pub mod throttle;

// Re-export commonly used types for convenience
// ------------------------------
pub use collections::HistoryBuffer;
pub use retry::{
    attempt, retry, retry_with_config, RetryConfig, RetryConfigBuilder, RetryError, RetryHandle,
    RetryResult,
};
pub use throttle::{
    AdmissionPolicy, FixedInterval, QueueHandle, SlidingWindow, ThrottleError, ThrottleQueue,
    ThrottleResult,
};
