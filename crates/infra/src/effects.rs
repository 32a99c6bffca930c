//! Work that follows a committed unit: audit entries, notifications and
//! alert evaluation. None of it can fail the operation that committed.

use std::sync::Arc;

use tracing::warn;

use rxledger_core::ProductId;

use crate::alerts::AlertEvaluator;
use crate::audit::{AuditEntry, AuditSink, record_quietly};
use crate::config::AlertMode;
use crate::notify::{LedgerEvent, Notifier};

#[derive(Debug)]
pub struct PostCommit {
    evaluator: Arc<AlertEvaluator>,
    notifier: Arc<Notifier>,
    audit: Arc<dyn AuditSink>,
    mode: AlertMode,
}

impl PostCommit {
    pub fn new(
        evaluator: Arc<AlertEvaluator>,
        notifier: Arc<Notifier>,
        audit: Arc<dyn AuditSink>,
        mode: AlertMode,
    ) -> Self {
        Self {
            evaluator,
            notifier,
            audit,
            mode,
        }
    }

    pub fn evaluator(&self) -> &Arc<AlertEvaluator> {
        &self.evaluator
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub(crate) fn audit(&self, entry: AuditEntry) {
        record_quietly(self.audit.as_ref(), entry);
    }

    pub(crate) fn notify(&self, event: LedgerEvent) {
        self.notifier.publish(event);
    }

    /// Re-evaluate stock alerts of `products`.
    ///
    /// Inline mode awaits the evaluation; background mode spawns it onto the
    /// current runtime (or runs inline when there is none).
    pub(crate) async fn evaluate(&self, products: &[ProductId]) {
        if self.mode == AlertMode::Background {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let evaluator = self.evaluator.clone();
                let products = products.to_vec();
                runtime.spawn(async move { evaluate_all(&evaluator, &products).await });
                return;
            }
        }
        evaluate_all(&self.evaluator, products).await;
    }
}

async fn evaluate_all(evaluator: &AlertEvaluator, products: &[ProductId]) {
    for product_id in products {
        if let Err(err) = evaluator.evaluate(*product_id).await {
            warn!(product_id = %product_id, error = %err, "post-commit alert evaluation failed");
        }
    }
}
