//! Bounded collections used by the scheduling engines.

pub mod history;

pub use history::HistoryBuffer;
