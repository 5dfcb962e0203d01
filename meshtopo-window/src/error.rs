//! Error types for grouping windows.

use thiserror::Error;

/// Errors raised when building or restoring a window.
///
/// Event admission never fails: late or malformed events are dropped and
/// counted instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    /// The idle gap must be a positive number of milliseconds.
    #[error("window gap must be positive, got {0} ms")]
    InvalidGap(i64),

    /// A restored run had no events.
    #[error("snapshot run for key {0:?} has no events")]
    EmptyRun(String),

    /// A restored snapshot listed the same key twice.
    #[error("snapshot lists key {0:?} more than once")]
    DuplicateKey(String),
}
