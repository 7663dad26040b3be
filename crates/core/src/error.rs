use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TabulaError {
    /// Source unreachable, unsupported or malformed at open time.
    #[error("connection error: {0}")]
    Connection(String),

    /// Table listing or row read failed.
    #[error("read error: {0}")]
    Read(String),

    /// Structural mapping failure affecting every row of a table.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The sink rejected a batch.
    #[error("write error: {0}")]
    Write(String),

    /// Invalid option value or specification document.
    #[error("config error: {0}")]
    Config(String),
}

impl TabulaError {
    /// Short kind label used in failure events and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TabulaError::Connection(_) => "connection",
            TabulaError::Read(_) => "read",
            TabulaError::Mapping(_) => "mapping",
            TabulaError::Write(_) => "write",
            TabulaError::Config(_) => "config",
        }
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            TabulaError::Connection(m)
            | TabulaError::Read(m)
            | TabulaError::Mapping(m)
            | TabulaError::Write(m)
            | TabulaError::Config(m) => m,
        }
    }
}

impl From<std::io::Error> for TabulaError {
    fn from(e: std::io::Error) -> Self {
        TabulaError::Read(e.to_string())
    }
}

/// A recoverable, row-local mapping failure.
///
/// Never surfaced as a failure event on its own; collected next to the batch
/// and reported in aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

impl RowError {
    pub fn new(row: usize, message: impl Into<String>) -> Self {
        Self {
            row,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_message() {
        let err = TabulaError::Mapping("class name is hidden".into());
        assert_eq!(err.kind(), "mapping");
        assert_eq!(err.message(), "class name is hidden");
        assert_eq!(err.to_string(), "mapping error: class name is hidden");
    }

    #[test]
    fn row_error_display() {
        let err = RowError::new(3, "object name is missing");
        assert_eq!(err.to_string(), "row 3: object name is missing");
    }
}
