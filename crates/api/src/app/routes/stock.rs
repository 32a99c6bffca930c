//! Stock movements of one product: receipts, adjustments and ledger reads.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use rxledger_core::ProductId;
use rxledger_infra::LedgerService;
use rxledger_inventory::HistoryFilter;

use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/stock", get(current_stock))
        .route("/:id/receive", post(receive_stock))
        .route("/:id/adjust", post(adjust_stock))
        .route("/:id/history", get(history))
        .route("/:id/summary", get(summary))
        .route("/:id/verify", get(verify))
}

pub async fn receive_stock(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveStockRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.receive(body.into_command(product_id, actor.actor())).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.adjust(body.into_command(product_id, actor.actor())).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn current_stock(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.current_stock(product_id).await {
        Ok(stock) => (
            StatusCode::OK,
            Json(serde_json::json!({ "product_id": product_id, "stock_quantity": stock })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Movements, newest first.
pub async fn history(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
    Query(filter): Query<HistoryFilter>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.history(product_id, &filter).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn summary(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
    Query(query): Query<dto::SummaryQuery>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.summary(product_id, query.month, query.year).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn verify(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.verify(product_id).await {
        Ok(v) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "product_id": v.product_id,
                "stock_quantity": v.projected_stock,
                "movements": v.movements,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
