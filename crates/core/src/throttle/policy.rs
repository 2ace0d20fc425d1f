//! Admission policies deciding how long the next dispatch must wait.

use std::time::Duration;

use tokio::time::Instant;

use crate::collections::HistoryBuffer;

/// Decides when the next queued action may start, given the start times of
/// previously dispatched ones.
///
/// The queue core asks for a delay when it schedules a dispatch timer and
/// records each start as it happens; policies never observe cancelled entries.
pub trait AdmissionPolicy: Send + 'static {
    /// How long after `now` the next dispatch is permitted. Zero means
    /// immediately.
    fn next_delay(&self, now: Instant) -> Duration;

    /// Record that an action started at `at`.
    fn record_dispatch(&mut self, at: Instant);
}

/// Single-slot spacing: successive starts are at least `interval` apart.
///
/// The first dispatch is never delayed.
#[derive(Debug)]
pub struct FixedInterval {
    interval: Duration,
    last_dispatch: Option<Instant>,
}

impl FixedInterval {
    /// Create a policy enforcing `interval` between successive starts.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_dispatch: None }
    }
}

impl AdmissionPolicy for FixedInterval {
    fn next_delay(&self, now: Instant) -> Duration {
        match self.last_dispatch {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_duration_since(now),
        }
    }

    fn record_dispatch(&mut self, at: Instant) {
        self.last_dispatch = Some(at);
    }
}

/// Sliding-window rate limit: at most `limit` starts within any trailing
/// window of `period`.
///
/// The start times of the last `limit` dispatches live in a
/// [`HistoryBuffer`]; its [`tail`](HistoryBuffer::tail) is the dispatch about
/// to fall outside the trailing window, so the next start must wait until
/// `tail + period`. Until `limit` dispatches have ever happened there is no
/// window boundary and admission is immediate.
#[derive(Debug)]
pub struct SlidingWindow {
    period: Duration,
    starts: HistoryBuffer<Instant>,
}

impl SlidingWindow {
    /// Create a policy admitting at most `limit` starts per trailing `period`.
    ///
    /// A `limit` of zero is clamped to one.
    pub fn new(limit: usize, period: Duration) -> Self {
        Self { period, starts: HistoryBuffer::new(limit) }
    }
}

impl AdmissionPolicy for SlidingWindow {
    fn next_delay(&self, now: Instant) -> Duration {
        match self.starts.tail() {
            None => Duration::ZERO,
            Some(&oldest) => (oldest + self.period).saturating_duration_since(now),
        }
    }

    fn record_dispatch(&mut self, at: Instant) {
        self.starts.insert(at);
    }
}
