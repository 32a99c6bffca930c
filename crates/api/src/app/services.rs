use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use rxledger_events::{Event, Subscription};
use rxledger_infra::{LedgerConfig, LedgerEnvelope, LedgerError, LedgerService};

/// Build the ledger service: Postgres when a database URL is configured,
/// in-memory stores otherwise.
pub async fn build_services(config: LedgerConfig) -> Result<Arc<LedgerService>, LedgerError> {
    Ok(Arc::new(LedgerService::from_config(config).await?))
}

/// Server-sent events of every committed ledger change.
pub fn ledger_sse_stream(
    ledger: &LedgerService,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(forward_events(ledger.subscribe(), tx));

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Pump bus messages into one client's channel until the bus closes or the
/// client goes away, whichever comes first.
async fn forward_events(
    mut subscription: Subscription<LedgerEnvelope>,
    tx: mpsc::Sender<Result<SseEvent, Infallible>>,
) {
    loop {
        let envelope = tokio::select! {
            _ = tx.closed() => break,
            next = subscription.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let payload = envelope.payload();
        let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
        let event = SseEvent::default().event(payload.event_type()).data(data);
        if tx.send(Ok(event)).await.is_err() {
            break;
        }
    }
    debug!(missed = subscription.missed(), "sse stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwarding_stops_when_the_client_leaves_a_quiet_bus() {
        let ledger = LedgerService::in_memory(LedgerConfig::default());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), forward_events(ledger.subscribe(), tx))
            .await
            .expect("forwarder outlived its client");
    }
}
