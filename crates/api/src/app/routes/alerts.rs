use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use rxledger_core::{AlertId, ProductId};
use rxledger_infra::LedgerService;
use rxledger_inventory::AlertFilter;

use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_alerts))
        .route("/sweep", post(sweep))
        .route("/evaluate/:product_id", post(evaluate))
        .route("/:id", get(get_alert))
        .route("/:id/resolve", post(resolve_alert))
}

pub async fn list_alerts(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Query(filter): Query<AlertFilter>,
) -> axum::response::Response {
    match ledger.list_alerts(&filter).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_alert(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id: AlertId = match errors::parse_id(&id, "alert") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.alert(alert_id).await {
        Ok(alert) => (StatusCode::OK, Json(alert)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Re-evaluate the stock rules of one product.
pub async fn evaluate(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(product_id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.evaluate_alerts(product_id).await {
        Ok(changes) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "opened": changes.opened,
                "resolved": changes.resolved,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Run the full stock and expiry sweep now.
pub async fn sweep(
    Extension(ledger): Extension<Arc<LedgerService>>,
    body: Option<Json<dto::SweepRequest>>,
) -> axum::response::Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let today = request.today.unwrap_or_else(|| Utc::now().date_naive());
    match ledger.sweep_alerts(today).await {
        Ok(report) => (StatusCode::OK, Json(dto::sweep_to_json(&report))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn resolve_alert(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let alert_id: AlertId = match errors::parse_id(&id, "alert") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.resolve_alert(alert_id, actor.actor()).await {
        Ok(alert) => (StatusCode::OK, Json(alert)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
