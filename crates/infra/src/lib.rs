//! Infrastructure layer: ledger stores, the settlement / reversal /
//! adjustment engines, alert evaluation, audit, notifications and config.
//!
//! Every stock mutation follows the same shape: lock the touched products in
//! id order, append movements and update the projection in one unit, commit,
//! then run best-effort post-commit effects (audit, notify, alerts).

pub mod adjustment;
pub mod alerts;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod error;
pub mod notify;
pub mod projector;
pub mod reversal;
pub mod service;
pub mod settlement;
pub mod store;

pub use adjustment::{AdjustStock, ReceiveStock, StockAdjuster};
pub use alerts::{AlertChanges, AlertEvaluator, AlertSweeper, SweepReport, SweeperHandle};
pub use audit::{AuditAction, AuditEntry, AuditError, AuditSink, InMemoryAuditLog, TracingAuditSink};
pub use catalog::Catalog;
pub use config::{AlertMode, LedgerConfig};
pub use error::{ErrorKind, LedgerError};
pub use notify::{LedgerEnvelope, LedgerEvent, Notifier};
pub use projector::{StockProjector, Verification, VerificationReport};
pub use reversal::{ReversalEngine, VoidSale};
pub use service::LedgerService;
pub use settlement::{SaleLineRequest, SettleSale, SettlementEngine};
