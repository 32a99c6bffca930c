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
use rxledger_inventory::{NewProduct, ProductUpdate};

use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/by-code/:code", get(get_product_by_code))
        .route(
            "/:id",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .route("/:id/archive", post(archive_product))
}

pub async fn create_product(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<NewProduct>,
) -> axum::response::Response {
    match ledger.create_product(body, actor.actor()).await {
        Ok(product) => (StatusCode::CREATED, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<ProductUpdate>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.update_product(product_id, body, actor.actor()).await {
        Ok(product) => (StatusCode::OK, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn archive_product(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.archive_product(product_id, actor.actor()).await {
        Ok(product) => (StatusCode::OK, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.delete_product(product_id, actor.actor()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let product_id: ProductId = match errors::parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ledger.product(product_id).await {
        Ok(product) => (StatusCode::OK, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_product_by_code(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Path(code): Path<String>,
) -> axum::response::Response {
    match ledger.product_by_code(&code).await {
        Ok(product) => (StatusCode::OK, Json(product)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_products(
    Extension(ledger): Extension<Arc<LedgerService>>,
    Query(query): Query<dto::ListProductsQuery>,
) -> axum::response::Response {
    match ledger.list_products(query.include_archived).await {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
