//! Inventory domain: products, the append-only movement chain and the stock /
//! expiry alert rules.
//!
//! Pure deterministic logic only (no IO, no storage, no clocks). Callers pass
//! timestamps and "today" explicitly.

pub mod alert;
pub mod movement;
pub mod product;

pub use alert::{AlertFilter, AlertPlan, AlertType, Severity, StockAlert};
pub use movement::{
    HistoryFilter, InventoryMovement, MonthWindow, MovementSummary, MovementType, NewMovement,
    ReferenceType,
};
pub use product::{NewProduct, Product, ProductUpdate};
