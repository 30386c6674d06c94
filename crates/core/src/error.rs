//! Errors raised while constructing domain values.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejection of a raw value at a domain constructor (`parse`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Malformed or empty identifier; the message starts with the id type.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
