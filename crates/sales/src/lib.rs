//! Sales domain: settled transactions, pricing and discount math, transaction
//! codes and the void policy.
//!
//! Pure deterministic logic only. Money is `i64` minor units (cents).

pub mod code;
pub mod pricing;
pub mod transaction;
pub mod void_policy;

pub use code::{is_transaction_code, transaction_code};
pub use pricing::{DiscountSpec, DiscountType, PriceBreakdown, price};
pub use transaction::{LineItem, PaymentMethod, Transaction, TransactionFilter, VoidRecord};
pub use void_policy::VoidPolicy;
