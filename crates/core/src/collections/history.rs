//! A fixed-capacity buffer over the most recently inserted values.
//!
//! A [`HistoryBuffer`] keeps at most the `capacity` most recent insertions,
//! evicting exactly the oldest surviving value when a new one arrives at
//! capacity. Access is newest-first: [`recent(0)`](HistoryBuffer::recent) is
//! the latest insertion, and [`tail`](HistoryBuffer::tail) is the value the
//! *next* insertion will evict, which is the boundary of a trailing
//! rate-limit window.
//!
//! # Complexity
//! - `insert`, `recent`, `tail`, `len`, `is_empty`, `is_full`, and `capacity`
//!   are all **O(1)** time.
//!
//! # Panic Safety
//! - Public methods avoid panicking; out-of-range and pre-fill queries yield
//!   `None` rather than an error.

use std::collections::VecDeque;

/// A fixed-capacity buffer of the most recently inserted values, indexed
/// newest-first.
///
/// # Examples
///
/// ```rust
/// use paceline_core::collections::HistoryBuffer;
///
/// let mut history = HistoryBuffer::new(3);
/// history.insert(1);
/// history.insert(2);
/// history.insert(3);
/// history.insert(4); // evicts `1`
///
/// assert_eq!(history.recent(0), Some(&4));
/// assert_eq!(history.recent(2), Some(&2));
/// assert_eq!(history.tail(), Some(&2)); // evicted by the next insert
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    /// Creates a new buffer with the provided capacity.
    ///
    /// A capacity of zero is clamped to `1`, ensuring at least one slot without
    /// panicking.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    /// Inserts a value as the newest entry, evicting the oldest when full.
    #[inline]
    pub fn insert(&mut self, value: T) {
        if self.is_full() {
            let _ = self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    /// Returns the `(i + 1)`-th most recently inserted value.
    ///
    /// `recent(0)` is the newest entry. Returns `None` when fewer than `i + 1`
    /// values have ever been inserted, or when the requested value has already
    /// been evicted (`i >= capacity`).
    #[inline]
    #[must_use]
    pub fn recent(&self, i: usize) -> Option<&T> {
        let len = self.buf.len();
        if i >= len {
            return None;
        }
        self.buf.get(len - 1 - i)
    }

    /// Returns the oldest surviving value once the buffer has filled.
    ///
    /// Equivalent to `recent(capacity - 1)`: the entry that the *next* insert
    /// will evict. Returns `None` until `capacity` values have been inserted,
    /// which callers read as "no rate-limit window boundary yet".
    #[inline]
    #[must_use]
    pub fn tail(&self) -> Option<&T> {
        self.recent(self.capacity - 1)
    }

    /// Returns the number of values currently stored.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when no value has been inserted yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns `true` when the buffer holds `capacity` values.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Returns the maximum number of values the buffer can hold.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all values, leaving the capacity unchanged.
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Returns an iterator visiting surviving values from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}
