//! `rxledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the inventory and
//! sales crates (no infrastructure concerns).

pub mod actor;
pub mod error;
pub mod id;
pub mod version;

pub use actor::{Actor, Role};
pub use error::{DomainError, DomainResult};
pub use id::{AlertId, MovementId, ProductId, TransactionId, UserId};
pub use version::ExpectedVersion;
