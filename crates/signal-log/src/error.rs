//! Error types for signal-log
//!
//! Writer-side structural errors abort the append in progress but leave
//! previously committed rows intact. Reader-side per-row anomalies are
//! surfaced as items of the range iterator so the caller decides whether
//! to propagate them.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors that can occur while writing or reading a signal log
#[derive(Debug, Error)]
pub enum LogError {
    /// A timestamp did not advance for its signal
    #[error(
        "Signal {signal:?} has wrong timestamp sequence: {old:.9} -> {new:.9} (delta = {delta:.5})"
    )]
    TimestampOrder {
        signal: String,
        old: f64,
        new: f64,
        delta: f64,
    },

    /// A row fell outside the requested window (strict reads only)
    #[error("Row {index} of signal {signal:?} has timestamp {timestamp} outside [{start}, {stop}]")]
    OutOfWindow {
        signal: String,
        index: u64,
        timestamp: f64,
        start: f64,
        stop: f64,
    },

    /// The dtype/shape cannot be stored by the table engine
    #[error("Unsupported schema for dtype {dtype} with shape {shape:?}: {reason}")]
    UnsupportedSchema {
        dtype: String,
        shape: Vec<usize>,
        reason: String,
    },

    /// A value disagrees with the signal's established type
    #[error("Type mismatch for signal {signal:?}: expected {expected}, got {actual}")]
    TypeMismatch {
        signal: String,
        expected: String,
        actual: String,
    },

    /// Array data does not match its dtype and shape
    #[error("Array shape error: {0}")]
    Shape(String),

    /// A value is well-typed but cannot be encoded
    #[error("Invalid value for signal {signal:?}: {reason}")]
    InvalidValue { signal: String, reason: String },

    /// The store accepted an append but read-back disagrees
    #[error("Could not commit row {index} of signal {signal:?}: {reason}")]
    Commit {
        signal: String,
        index: u64,
        reason: String,
    },

    /// The structured-value codec cannot guarantee a faithful round trip
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored record could not be decoded
    #[error("Corrupt record {index} in signal {signal:?}: {reason}")]
    CorruptRecord {
        signal: String,
        index: u64,
        reason: String,
    },

    /// The file does not carry the log root
    #[error("File {} does not appear to be a signal log: {reason}", .path.display())]
    NotALog { path: PathBuf, reason: String },

    /// Bounds were requested for a signal without rows
    #[error("Signal {0:?} has no rows")]
    EmptySignal(String),

    /// The signal does not exist in the log
    #[error("Unknown signal: {0:?}")]
    UnknownSignal(String),

    /// A table with this name already exists under the log root
    #[error("Table already exists: {0:?}")]
    TableExists(String),

    /// The writer was used after `finish()`
    #[error("Log writer for {} is already finished", .0.display())]
    Finished(PathBuf),

    /// I/O error on the log file or its directory
    #[error("I/O error: {0}")]
    Io(String),

    /// Error reported by the underlying table store
    #[error("Table store error: {0}")]
    Store(String),
}

impl LogError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new table store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new CorruptRecord error
    pub fn corrupt(signal: impl Into<String>, index: u64, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            signal: signal.into(),
            index,
            reason: reason.into(),
        }
    }

    /// Create a new InvalidValue error
    pub fn invalid(signal: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            signal: signal.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error concerns a single row rather than the whole file
    ///
    /// Row-level errors leave the rest of a range read usable.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Self::CorruptRecord { .. } | Self::OutOfWindow { .. } | Self::TimestampOrder { .. }
        )
    }
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}

impl From<postcard::Error> for LogError {
    fn from(err: postcard::Error) -> Self {
        LogError::Store(format!("attribute encoding: {err}"))
    }
}

macro_rules! impl_from_redb {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for LogError {
                fn from(err: $err) -> Self {
                    LogError::Store(err.to_string())
                }
            }
        )*
    };
}

impl_from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
