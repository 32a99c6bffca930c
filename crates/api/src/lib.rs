//! HTTP API: routing, caller identity and request/response mapping over the
//! ledger service.

pub mod app;
pub mod context;
pub mod middleware;
