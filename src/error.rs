//! Error types for the index.
//!
//! An absent key is not an error: `search` and `remove` report it as
//! `Ok(None)`. The variants here are reserved for conditions the caller
//! cannot recover from within this tree instance, so "key absent" and
//! "index corrupted" are always distinguishable.

use thiserror::Error;

use crate::compare::ComparatorError;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by tree operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Internal node state violated a structural invariant. The operation
    /// was aborted before mutating further; the index should be considered
    /// corrupted and rebuilt by the owning storage layer.
    #[error("index corrupted: {0}")]
    InvariantViolation(String),

    /// The caller-supplied key ordering reported a failure. Not retried;
    /// no safe recovery is possible inside the tree.
    #[error("comparator failed: {0}")]
    Comparator(#[from] ComparatorError),
}

impl Error {
    /// Shorthand for an [`Error::InvariantViolation`].
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Error::InvariantViolation(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_display() {
        let err = Error::invariant("children/key count mismatch");
        assert_eq!(
            err.to_string(),
            "index corrupted: children/key count mismatch"
        );
    }

    #[test]
    fn comparator_display() {
        let err = Error::from(ComparatorError::new("keys are incomparable"));
        assert_eq!(err.to_string(), "comparator failed: keys are incomparable");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
