//! Errors raised while building model values.

use thiserror::Error;

/// Errors from model construction and parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A connection expiry string could not be parsed.
    #[error("invalid expiry expression {expr:?}: {reason}")]
    InvalidExpiry {
        /// The offending expression.
        expr: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl CoreError {
    pub(crate) fn invalid_expiry(expr: &str, reason: impl Into<String>) -> Self {
        Self::InvalidExpiry {
            expr: expr.to_owned(),
            reason: reason.into(),
        }
    }
}
