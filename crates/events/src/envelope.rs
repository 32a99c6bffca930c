use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope for a published event.
///
/// `sequence` is assigned by the publisher and increases by one per published
/// event, which lets listeners notice gaps after lagging behind the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    sequence: u64,
    event_type: String,
    subject: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, copying its metadata into the envelope.
    pub fn wrap(sequence: u64, event: E) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            sequence,
            event_type: event.event_type().to_string(),
            subject: event.subject(),
            occurred_at: event.occurred_at(),
            payload: event,
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
