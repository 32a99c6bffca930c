//! Error model of the ledger engines.
//!
//! Every engine operation returns [`LedgerError`]. Callers (the HTTP layer)
//! branch on [`LedgerError::kind`] rather than on individual variants:
//!
//! | kind | meaning | retry |
//! |------|---------|-------|
//! | `Validation` | malformed input, rejected before anything was read | no |
//! | `Business` | well-formed request the current state does not allow | no |
//! | `NotFound` | referenced product / transaction / alert does not exist | no |
//! | `Unauthorized` | the actor may not perform the operation | no |
//! | `Conflict` | lost an optimistic race after all retries | yes |
//! | `Consistency` | ledger chain or projection divergence (fatal for the unit) | no |
//! | `Infrastructure` | store unavailable | yes |

use std::future::Future;

use thiserror::Error;

use rxledger_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("ledger consistency violation: {0}")]
    Consistency(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Business,
    NotFound,
    Unauthorized,
    Conflict,
    Consistency,
    Infrastructure,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Domain(e) => match e {
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::BusinessRule(_) | DomainError::InsufficientStock { .. } => {
                    ErrorKind::Business
                }
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::InvariantViolation(_) => ErrorKind::Consistency,
            },
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Consistency(_) => ErrorKind::Consistency,
            LedgerError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::Domain(DomainError::not_found(what))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Infrastructure)
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) | StoreError::Duplicate(msg) => LedgerError::Conflict(msg),
            StoreError::Consistency(msg) => LedgerError::Consistency(msg),
            StoreError::NotFound(what) => LedgerError::not_found(what),
            StoreError::Unavailable(msg) => LedgerError::Infrastructure(msg),
        }
    }
}

/// Log a failed engine operation at the level its kind deserves.
///
/// Consistency and infrastructure failures are errors; everything else is a
/// rejected request.
pub(crate) fn trace_failure(operation: &'static str, err: &LedgerError) {
    match err.kind() {
        ErrorKind::Consistency => {
            tracing::error!(operation, error = %err, "ledger consistency violation, unit aborted")
        }
        ErrorKind::Infrastructure => {
            tracing::error!(operation, error = %err, "ledger store failure")
        }
        ErrorKind::Conflict => tracing::warn!(operation, error = %err, "ledger operation conflicted"),
        _ => tracing::warn!(operation, error = %err, "ledger operation rejected"),
    }
}

/// Run a unit of work, re-running it while it loses optimistic races
/// (version checks, transaction-code collisions), at most `attempts` times.
pub(crate) async fn retry_conflicts<T, F, Fut>(
    operation: &'static str,
    attempts: u32,
    mut run: F,
) -> Result<T, LedgerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match run(attempt).await {
            Err(err) if err.kind() == ErrorKind::Conflict && attempt < attempts => {
                tracing::warn!(operation, attempt, error = %err, "ledger unit conflicted, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_classify() {
        let cases = [
            (StoreError::Concurrency("v".into()), ErrorKind::Conflict),
            (StoreError::Duplicate("code".into()), ErrorKind::Conflict),
            (StoreError::Consistency("chain".into()), ErrorKind::Consistency),
            (StoreError::NotFound("product".into()), ErrorKind::NotFound),
            (StoreError::Unavailable("down".into()), ErrorKind::Infrastructure),
        ];
        for (store, kind) in cases {
            assert_eq!(LedgerError::from(store).kind(), kind);
        }
    }

    #[test]
    fn insufficient_stock_is_a_business_error() {
        let err = LedgerError::from(DomainError::insufficient_stock("PCM-500", 5, 2));
        assert_eq!(err.kind(), ErrorKind::Business);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("short by 3"));
    }

    #[tokio::test]
    async fn conflicts_are_retried_up_to_the_limit() {
        let mut calls = 0;
        let result: Result<(), _> = retry_conflicts("test", 3, |_| {
            calls += 1;
            async { Err(LedgerError::Conflict("stale".into())) }
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(calls, 3);

        let recovered = retry_conflicts("test", 3, |attempt| async move {
            if attempt < 2 {
                Err(LedgerError::Conflict("stale".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(recovered.unwrap(), 2);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_conflicts("test", 3, |_| {
            calls += 1;
            async { Err(LedgerError::from(DomainError::business("no"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
