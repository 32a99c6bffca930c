use axum::{routing::get, Router};

pub mod alerts;
pub mod products;
pub mod stock;
pub mod system;
pub mod transactions;

/// Router for all identified (actor-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/products", products::router().merge(stock::router()))
        .nest("/transactions", transactions::router())
        .nest("/alerts", alerts::router())
        .nest("/ledger", system::ledger_router())
}
