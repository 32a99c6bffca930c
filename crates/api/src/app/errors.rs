use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use rxledger_infra::{ErrorKind, LedgerError};

/// Map a ledger failure onto a transport response.
///
/// Consistency and infrastructure failures are logged by the engines; the
/// caller only gets a generic message.
pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err.kind() {
        ErrorKind::Validation => json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string()),
        ErrorKind::Business => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "business_rule", err.to_string())
        }
        ErrorKind::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        ErrorKind::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        ErrorKind::Conflict => json_error(
            StatusCode::CONFLICT,
            "conflict",
            "the product changed concurrently; retry the request",
        ),
        ErrorKind::Consistency => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "the ledger rejected the operation",
        ),
        ErrorKind::Infrastructure => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "the ledger store is unavailable; retry later",
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 with `what` in the message on failure.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxledger_core::DomainError;

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (LedgerError::from(DomainError::validation("bad")), StatusCode::BAD_REQUEST),
            (
                LedgerError::from(DomainError::insufficient_stock("AMX", 5, 1)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (LedgerError::not_found("product"), StatusCode::NOT_FOUND),
            (LedgerError::Conflict("version".into()), StatusCode::CONFLICT),
            (LedgerError::Consistency("chain".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (LedgerError::Infrastructure("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }
}
