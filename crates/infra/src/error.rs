//! Storage and use-case errors.
//!
//! `StoreError` is what a backend can fail with. `UseCaseError` is what callers
//! of the application services see: either a deterministic domain failure or a
//! storage failure, each with a stable machine-readable code.

use thiserror::Error;

use tallyline_core::DomainError;

use crate::ports::PortError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique violation or optimistic version mismatch.
    #[error("storage conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The transaction handle was already committed or rolled back.
    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored or submitted data cannot be represented: numeric overflow,
    /// out-of-range value or a violated check constraint. Retrying cannot help.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Connection, timeout or other backend failure. Transient.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        StoreError::InvalidData(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum UseCaseError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PortError> for UseCaseError {
    fn from(value: PortError) -> Self {
        UseCaseError::Domain(DomainError::dependency(value.to_string()))
    }
}

impl UseCaseError {
    /// Stable, machine-readable code. Transient failures share one generic code.
    pub fn code(&self) -> &'static str {
        match self {
            UseCaseError::Domain(e) => e.code(),
            UseCaseError::Store(StoreError::Conflict(_)) => "conflict",
            UseCaseError::Store(StoreError::NotFound(_)) => "not_found",
            UseCaseError::Store(StoreError::InvalidData(_)) => "invariant_violation",
            UseCaseError::Store(_) => "storage_unavailable",
        }
    }

    /// Safe to retry as-is: nothing from the failed unit of work was committed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UseCaseError::Domain(_) => false,
            UseCaseError::Store(e) => e.is_retryable(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.code() == "conflict"
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            UseCaseError::Domain(e) => Some(e),
            UseCaseError::Store(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallyline_core::ValidationReason;

    #[test]
    fn codes_are_stable() {
        let v: UseCaseError =
            DomainError::validation(ValidationReason::ZeroDelta, "zero").into();
        assert_eq!(v.code(), "zero_delta");
        assert!(!v.is_retryable());

        let c: UseCaseError = StoreError::Conflict("open session exists".into()).into();
        assert!(c.is_conflict());

        let b: UseCaseError = StoreError::Backend("connection reset".into()).into();
        assert_eq!(b.code(), "storage_unavailable");
        assert!(b.is_retryable());
    }

    #[test]
    fn invalid_data_is_not_transient() {
        let e: UseCaseError = StoreError::InvalidData("numeric field overflow".into()).into();
        assert_eq!(e.code(), "invariant_violation");
        assert!(!e.is_retryable());

        let from_domain = StoreError::from(DomainError::invariant("on-hand balance overflowed"));
        assert!(matches!(from_domain, StoreError::InvalidData(_)));
    }

    #[test]
    fn domain_conflicts_are_conflicts_too() {
        let e: UseCaseError = DomainError::conflict("stale").into();
        assert!(e.is_conflict());
    }

    #[test]
    fn port_failures_become_dependency_errors() {
        let e: UseCaseError = PortError::new("catalog timed out").into();
        assert_eq!(e.code(), "dependency_error");
    }
}
