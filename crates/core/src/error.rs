//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business/domain failures only (validation, business rules,
/// invariants, conflicts). Storage and transport failures belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before anything is read or written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A well-formed request that the current state does not allow.
    #[error("{0}")]
    BusinessRule(String),

    /// Requested quantity exceeds the product's available stock.
    #[error(
        "insufficient stock for {product_code}: requested {requested}, available {available} (short by {shortfall})"
    )]
    InsufficientStock {
        product_code: String,
        requested: i64,
        available: i64,
        shortfall: i64,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The acting identity may not perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn business(msg: impl Into<String>) -> Self {
        Self::BusinessRule(msg.into())
    }

    pub fn insufficient_stock(product_code: impl Into<String>, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            product_code: product_code.into(),
            requested,
            available,
            shortfall: requested.saturating_sub(available),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_reports_shortfall() {
        let err = DomainError::insufficient_stock("AMOX-500", 8, 5);
        match &err {
            DomainError::InsufficientStock { shortfall, .. } => assert_eq!(*shortfall, 3),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "insufficient stock for AMOX-500: requested 8, available 5 (short by 3)"
        );
    }

    #[test]
    fn business_rule_message_is_verbatim() {
        let err = DomainError::business("transaction is already voided");
        assert_eq!(err.to_string(), "transaction is already voided");
    }
}
