//! Throttled FIFO dispatch of asynchronous actions.
//!
//! A [`ThrottleQueue`] decides *when* each enqueued action starts, never
//! whether it runs more than once; that is the retry engine's job. Two
//! admission policies are provided:
//!
//! - [`FixedInterval`] (single-slot): successive starts are at least a fixed
//!   interval apart, with the first action starting immediately.
//! - [`SlidingWindow`]: at most `limit` starts within any trailing window of
//!   `period`, a strictly stronger guarantee than fixed spacing.
//!
//! Submission order is preserved exactly among entries that are not cancelled
//! before dispatch. Cancellation is best-effort: it prevents execution only if
//! the entry has not yet been dispatched, and always resolves the entry's
//! handle.

pub mod policy;
pub mod queue;

pub use policy::{AdmissionPolicy, FixedInterval, SlidingWindow};
pub use queue::{QueueHandle, ThrottleError, ThrottleQueue, ThrottleResult};
