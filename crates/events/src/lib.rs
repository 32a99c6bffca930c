//! Ledger notification mechanics: event contract, envelopes and a best-effort
//! pub/sub bus used to push committed ledger changes to interested listeners
//! (dashboards, audit displays).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
