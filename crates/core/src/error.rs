//! Error types for Cuenca

use thiserror::Error;

/// Main error type for Cuenca operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or degenerate input raster. Raised before any stage runs.
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// An internal flow invariant (acyclic routing, boundary-only outlets)
    /// was broken at the given cell.
    #[error("Routing inconsistency at ({row}, {col}): {reason}")]
    RoutingInconsistency {
        row: usize,
        col: usize,
        reason: String,
    },

    /// The caller asked the run to stop.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a caller-requested abort rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Shorthand for [`Error::InvalidParameter`].
    pub fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Cuenca operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::InvalidGrid("empty".into()).is_cancelled());
    }

    #[test]
    fn test_routing_message_names_cell() {
        let err = Error::RoutingInconsistency {
            row: 3,
            col: 7,
            reason: "interior outlet".into(),
        };
        assert_eq!(
            err.to_string(),
            "Routing inconsistency at (3, 7): interior outlet"
        );
    }
}
