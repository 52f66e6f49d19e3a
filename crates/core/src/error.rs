//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Machine-readable reason attached to a validation failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    NonPositiveQuantity,
    ZeroDelta,
    MissingNote,
    EmptyLines,
    InvalidAmount,
    SessionNotOpen,
    ItemNotAssigned,
    PolicyDenied,
    InvalidTransition,
}

impl ValidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationReason::NonPositiveQuantity => "non_positive_quantity",
            ValidationReason::ZeroDelta => "zero_delta",
            ValidationReason::MissingNote => "missing_note",
            ValidationReason::EmptyLines => "empty_lines",
            ValidationReason::InvalidAmount => "invalid_amount",
            ValidationReason::SessionNotOpen => "session_not_open",
            ValidationReason::ItemNotAssigned => "item_not_assigned",
            ValidationReason::PolicyDenied => "policy_denied",
            ValidationReason::InvalidTransition => "invalid_transition",
        }
    }
}

impl core::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Storage failures are modelled in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input. Always raised before any write.
    #[error("validation failed ({reason}): {message}")]
    Validation {
        reason: ValidationReason,
        message: String,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The referenced subject does not exist for this tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or state invariant would be violated (e.g. duplicate open session).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external collaborator (catalog, policy store) failed or disagreed.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(reason: ValidationReason, msg: impl Into<String>) -> Self {
        Self::Validation {
            reason,
            message: msg.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }

    /// Stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation { reason, .. } => reason.as_str(),
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::Dependency(_) => "dependency_error",
            DomainError::Unauthorized => "unauthorized",
        }
    }

    /// Validation reason, when this is a validation failure.
    pub fn validation_reason(&self) -> Option<ValidationReason> {
        match self {
            DomainError::Validation { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_code_is_the_reason() {
        let err = DomainError::validation(ValidationReason::MissingNote, "note is required");
        assert_eq!(err.code(), "missing_note");
        assert_eq!(err.validation_reason(), Some(ValidationReason::MissingNote));
        assert_eq!(
            err.to_string(),
            "validation failed (missing_note): note is required"
        );
    }

    #[test]
    fn non_validation_errors_have_static_codes() {
        assert_eq!(DomainError::conflict("x").code(), "conflict");
        assert_eq!(DomainError::not_found("session").code(), "not_found");
        assert_eq!(DomainError::dependency("catalog down").code(), "dependency_error");
        assert_eq!(DomainError::Unauthorized.validation_reason(), None);
    }
}
