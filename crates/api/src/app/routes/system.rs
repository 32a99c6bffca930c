use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{sse::Event as SseEvent, IntoResponse},
    routing::get,
    Json, Router,
};

use rxledger_infra::LedgerService;

use crate::app::{dto, errors, services};
use crate::context::ActorContext;

pub fn ledger_router() -> Router {
    Router::new().route("/verify", get(verify_ledger))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(actor): Extension<ActorContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": actor.user_id().to_string(),
        "role": actor.role().as_str(),
        "privileged": actor.actor().is_privileged(),
    }))
}

pub async fn stream(
    Extension(ledger): Extension<Arc<LedgerService>>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::ledger_sse_stream(&ledger)
}

/// Replay every product's ledger against its projected stock.
pub async fn verify_ledger(Extension(ledger): Extension<Arc<LedgerService>>) -> axum::response::Response {
    match ledger.verify_all().await {
        Ok(report) => (StatusCode::OK, Json(dto::verification_to_json(&report))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
