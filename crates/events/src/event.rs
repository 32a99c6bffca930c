use chrono::{DateTime, Utc};

/// A fact about something that already committed.
///
/// Events are immutable and only ever published after the change they
/// describe is durable.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "ledger.sale.settled").
    fn event_type(&self) -> &'static str;

    /// Identifier of the entity the event is about (product, transaction, alert).
    fn subject(&self) -> String;

    /// When the underlying change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
