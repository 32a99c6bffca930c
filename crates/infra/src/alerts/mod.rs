//! Alert evaluation.
//!
//! Stock alerts follow the product's stock level after every committed
//! mutation; expiry alerts are evaluated by the periodic sweep. Alerts opened
//! or closed here are published as [`crate::notify::LedgerEvent`]s.

mod evaluator;
mod sweeper;

pub use evaluator::{AlertChanges, AlertEvaluator, SweepReport};
pub use sweeper::{AlertSweeper, SweeperHandle};
