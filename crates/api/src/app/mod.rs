//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: builds the ledger service from configuration
//! - `routes/`: HTTP routes + handlers (one file per ledger area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use rxledger_infra::LedgerService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(ledger: Arc<LedgerService>) -> Router {
    // Ledger routes: require a caller identity.
    let protected = routes::router()
        .layer(Extension(ledger))
        .layer(axum::middleware::from_fn(middleware::actor_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
