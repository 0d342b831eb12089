//! Payment Ledger
//!
//! Durable record of confirmed payments. The processor redelivers webhooks on
//! any non-2xx answer, so the ledger is keyed by processor event ID and a
//! repeated delivery is acknowledged without being recorded twice.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::webhook::PaymentEvent;

/// Payment ledger trait
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Record a paid invoice. Returns `false` if the event was already recorded.
    async fn record_paid(&self, event: &PaymentEvent) -> Result<bool>;

    /// Recorded payment for an invoice, if any
    async fn get_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentEvent>>;
}

/// In-memory ledger (for development)
pub struct MemoryPaymentLedger {
    events: RwLock<HashMap<String, PaymentEvent>>,
}

impl Default for MemoryPaymentLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPaymentLedger {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentLedger for MemoryPaymentLedger {
    async fn record_paid(&self, event: &PaymentEvent) -> Result<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.event_id) {
            tracing::info!(event_id = %event.event_id, "Duplicate payment delivery");
            return Ok(false);
        }

        events.insert(event.event_id.clone(), event.clone());
        tracing::info!(
            event_id = %event.event_id,
            invoice_id = %event.invoice_id,
            customer_id = %event.customer.id,
            "Recorded payment"
        );
        Ok(true)
    }

    async fn get_by_invoice(&self, invoice_id: &str) -> Result<Option<PaymentEvent>> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .find(|e| e.invoice_id == invoice_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::RemoteCustomer;
    use crate::invoice::InvoiceStatus;

    fn event(event_id: &str) -> PaymentEvent {
        PaymentEvent {
            event_id: event_id.into(),
            invoice_id: "in_1".into(),
            status: InvoiceStatus::Paid,
            amount_due: 5000,
            amount_paid: 5000,
            amount_remaining: 0,
            created: 0,
            payment_intent: None,
            product_id: Some("prod_A".into()),
            customer: RemoteCustomer {
                id: "cus_1".into(),
                email: Some("student@isct.ac.jp".into()),
                name: None,
                institutional_id: None,
            },
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_recorded_once() {
        let ledger = MemoryPaymentLedger::new();

        assert!(ledger.record_paid(&event("evt_1")).await.unwrap());
        assert!(!ledger.record_paid(&event("evt_1")).await.unwrap());
        assert_eq!(ledger.len().await, 1);

        let stored = ledger.get_by_invoice("in_1").await.unwrap().unwrap();
        assert_eq!(stored.event_id, "evt_1");
        assert!(ledger.get_by_invoice("in_2").await.unwrap().is_none());
    }
}
