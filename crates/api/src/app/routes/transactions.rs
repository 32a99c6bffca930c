use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use rxledger_core::TransactionId;
use rxledger_infra::LedgerService;
use rxledger_sales::{is_transaction_code, TransactionFilter};

use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(settle).get(list_transactions))
        .route("/:id", get(get_transaction))
        .route("/:id/void", post(void_transaction))
}

pub async fn settle(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::SettleRequest>,
) -> axum::response::Response {
    match ledger.settle(body.into_command(actor.actor())).await {
        Ok(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Look a transaction up by id or by its `TRX-` code.
pub async fn get_transaction(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let result = if is_transaction_code(&id) {
        ledger.transaction_by_code(&id).await
    } else {
        let transaction_id: TransactionId = match errors::parse_id(&id, "transaction") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        ledger.transaction(transaction_id).await
    };
    match result {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_transactions(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Query(filter): Query<TransactionFilter>,
) -> axum::response::Response {
    match ledger.list_transactions(&filter).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn void_transaction(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::VoidRequest>,
) -> axum::response::Response {
    let transaction_id: TransactionId = match errors::parse_id(&id, "transaction") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.void(body.into_command(transaction_id, actor.actor())).await {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
