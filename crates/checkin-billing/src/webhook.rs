//! Payment Webhook Processing
//!
//! Verifies inbound processor deliveries and turns `invoice.paid` events into
//! a canonical [`PaymentEvent`]. Every other event type is acknowledged and
//! discarded. The processor is only read from here; recording the payment is
//! left to a [`PaymentLedger`](crate::PaymentLedger).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::customer::RemoteCustomer;
use crate::error::{BillingError, Result};
use crate::invoice::InvoiceStatus;
use crate::processor::PaymentProcessor;
use crate::signature;

/// Event type that carries a completed payment
pub const INVOICE_PAID: &str = "invoice.paid";

/// Webhook endpoint configuration
#[derive(Clone)]
pub struct WebhookConfig {
    /// Endpoint signing secret (`whsec_...`)
    pub secret: String,

    /// Accepted clock difference for the signed timestamp
    pub tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: 300,
        }
    }

    /// Read `STRIPE_WEBHOOK_SECRET` and `STRIPE_WEBHOOK_TOLERANCE_SECS`
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        let tolerance_secs = match std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Ok(v) => v.parse().map_err(|_| {
                BillingError::Config("STRIPE_WEBHOOK_TOLERANCE_SECS must be an integer".into())
            })?,
            Err(_) => 300,
        };

        let config = Self {
            secret,
            tolerance_secs,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.secret.trim().is_empty() {
            return Err(BillingError::Config("webhook secret is empty".into()));
        }
        if self.tolerance_secs <= 0 {
            return Err(BillingError::Config("webhook tolerance must be positive".into()));
        }
        Ok(())
    }
}

/// Canonical record of a verified payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Processor event ID, stable across redeliveries
    pub event_id: String,
    pub invoice_id: String,
    pub status: InvoiceStatus,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub amount_remaining: i64,
    pub created: i64,
    pub payment_intent: Option<String>,
    /// Product of the single line item
    pub product_id: Option<String>,
    /// Customer snapshot fetched from the processor at consume time
    pub customer: RemoteCustomer,
}

/// Result of consuming one delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `invoice.paid`, fully resolved
    Paid(PaymentEvent),

    /// Any other event type; acknowledged and discarded
    Ignored { event_type: String },
}

// Wire shapes. Only the fields this processor reads are modelled.

#[derive(Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: EventData,
}

#[derive(Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// Either a bare ID or an expanded object carrying one
#[derive(Deserialize)]
#[serde(untagged)]
enum Reference {
    Id(String),
    Object { id: String },
}

impl Reference {
    fn id(&self) -> &str {
        match self {
            Reference::Id(id) | Reference::Object { id } => id,
        }
    }
}

#[derive(Deserialize)]
struct InvoicePayload {
    id: String,
    #[serde(default)]
    customer: Option<Reference>,
    status: Option<String>,
    #[serde(default)]
    amount_due: i64,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    amount_remaining: i64,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    payment_intent: Option<Reference>,
    #[serde(default)]
    lines: Option<LineList>,
}

#[derive(Deserialize)]
struct LineList {
    #[serde(default)]
    data: Vec<LinePayload>,
}

#[derive(Deserialize)]
struct LinePayload {
    #[serde(default)]
    price: Option<PricePayload>,
    #[serde(default)]
    pricing: Option<PricingPayload>,
}

#[derive(Deserialize)]
struct PricePayload {
    #[serde(default)]
    product: Option<Reference>,
}

/// Newer API versions move the product under `pricing.price_details`
#[derive(Deserialize)]
struct PricingPayload {
    #[serde(default)]
    price_details: Option<PriceDetails>,
}

#[derive(Deserialize)]
struct PriceDetails {
    #[serde(default)]
    product: Option<String>,
}

impl LinePayload {
    fn product_id(&self) -> Option<String> {
        self.price
            .as_ref()
            .and_then(|p| p.product.as_ref())
            .map(|p| p.id().to_string())
            .or_else(|| {
                self.pricing
                    .as_ref()
                    .and_then(|p| p.price_details.as_ref())
                    .and_then(|d| d.product.clone())
            })
    }
}

/// Webhook Processor
pub struct WebhookProcessor {
    config: WebhookConfig,
    processor: Arc<dyn PaymentProcessor>,
}

impl WebhookProcessor {
    pub fn new(config: WebhookConfig, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { config, processor }
    }

    /// Verify and consume one delivery
    pub async fn consume(&self, payload: &[u8], signature_header: &str) -> Result<WebhookOutcome> {
        self.consume_at(payload, signature_header, Utc::now().timestamp())
            .await
    }

    /// Verify against the clock value `now`, then consume
    pub async fn consume_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
    ) -> Result<WebhookOutcome> {
        if let Err(e) = signature::verify(
            &self.config.secret,
            payload,
            signature_header,
            self.config.tolerance_secs,
            now,
        ) {
            tracing::warn!(error = %e, "Rejected webhook delivery");
            return Err(e);
        }

        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| BillingError::MalformedPayload(format!("invalid event: {e}")))?;

        if envelope.type_ != INVOICE_PAID {
            tracing::debug!(event_type = %envelope.type_, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: envelope.type_,
            });
        }

        let invoice: InvoicePayload = serde_json::from_value(envelope.data.object)
            .map_err(|e| BillingError::MalformedPayload(format!("invalid invoice: {e}")))?;

        let lines = invoice.lines.map(|l| l.data).unwrap_or_default();
        let [line] = lines.as_slice() else {
            return Err(BillingError::MalformedPayload(format!(
                "invoice {} has {} line items, expected exactly one",
                invoice.id,
                lines.len()
            )));
        };

        let status = invoice
            .status
            .as_deref()
            .and_then(InvoiceStatus::parse)
            .ok_or_else(|| {
                BillingError::MalformedPayload(format!("invoice {} has no valid status", invoice.id))
            })?;

        let customer_id = invoice
            .customer
            .as_ref()
            .map(Reference::id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BillingError::MalformedPayload(format!("invoice {} has no customer", invoice.id))
            })?;

        let customer = self.processor.get_customer(customer_id).await?;

        let event = PaymentEvent {
            event_id: envelope.id,
            invoice_id: invoice.id,
            status,
            amount_due: invoice.amount_due,
            amount_paid: invoice.amount_paid,
            amount_remaining: invoice.amount_remaining,
            created: invoice.created,
            payment_intent: invoice.payment_intent.map(|p| p.id().to_string()),
            product_id: line.product_id(),
            customer,
        };

        tracing::info!(
            event_id = %event.event_id,
            invoice_id = %event.invoice_id,
            customer_id = %event.customer.id,
            amount_paid = event.amount_paid,
            "Verified invoice payment"
        );

        Ok(WebhookOutcome::Paid(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::NewCustomer;
    use crate::mock::MockProcessor;
    use crate::signature::signature_header;
    use serde_json::json;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_735_689_600;

    async fn setup() -> (Arc<MockProcessor>, WebhookProcessor) {
        let mock = Arc::new(MockProcessor::new());
        mock.create_customer(NewCustomer {
            email: "student@isct.ac.jp".into(),
            name: Some("Student".into()),
            institutional_id: Some("trap_student".into()),
        })
        .await
        .unwrap();
        let processor = WebhookProcessor::new(WebhookConfig::new(SECRET), mock.clone());
        (mock, processor)
    }

    fn line(product: &str) -> serde_json::Value {
        json!({ "id": "il_1", "price": { "id": "price_A1", "product": product } })
    }

    fn paid_event(lines: Vec<serde_json::Value>) -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "invoice.paid",
            "data": { "object": {
                "id": "in_9",
                "object": "invoice",
                "customer": "cus_1",
                "status": "paid",
                "amount_due": 5000,
                "amount_paid": 5000,
                "amount_remaining": 0,
                "created": NOW,
                "payment_intent": "pi_1",
                "lines": { "data": lines }
            }}
        })
        .to_string()
        .into_bytes()
    }

    async fn consume(processor: &WebhookProcessor, payload: &[u8]) -> Result<WebhookOutcome> {
        let header = signature_header(SECRET, payload, NOW).unwrap();
        processor.consume_at(payload, &header, NOW).await
    }

    #[tokio::test]
    async fn test_paid_event_is_canonicalized() {
        let (_, processor) = setup().await;

        let outcome = consume(&processor, &paid_event(vec![line("prod_A")])).await.unwrap();
        let WebhookOutcome::Paid(event) = outcome else {
            panic!("expected paid outcome");
        };

        assert_eq!(event.event_id, "evt_1");
        assert_eq!(event.status, InvoiceStatus::Paid);
        assert_eq!(event.product_id.as_deref(), Some("prod_A"));
        assert_eq!(event.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(event.customer.email.as_deref(), Some("student@isct.ac.jp"));
        assert_eq!(event.customer.institutional_id.as_deref(), Some("trap_student"));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_parsing() {
        let (_, processor) = setup().await;

        let header = signature_header("whsec_wrong", b"not json", NOW).unwrap();
        let err = processor.consume_at(b"not json", &header, NOW).await.unwrap_err();
        assert!(matches!(err, BillingError::BadSignature(_)));
    }

    #[tokio::test]
    async fn test_signed_garbage_is_malformed() {
        let (_, processor) = setup().await;
        let err = consume(&processor, b"not json").await.unwrap_err();
        assert!(matches!(err, BillingError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_two_line_items_rejected() {
        let (_, processor) = setup().await;

        let payload = paid_event(vec![line("prod_A"), line("prod_B")]);
        let err = consume(&processor, &payload).await.unwrap_err();
        assert!(matches!(err, BillingError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_zero_line_items_rejected() {
        let (_, processor) = setup().await;
        let err = consume(&processor, &paid_event(vec![])).await.unwrap_err();
        assert!(matches!(err, BillingError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let (_, processor) = setup().await;

        let payload = json!({
            "id": "evt_2",
            "type": "invoice.finalized",
            "data": { "object": {} }
        })
        .to_string();

        let outcome = consume(&processor, payload.as_bytes()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event_type: "invoice.finalized".into()
            }
        );
    }

    #[tokio::test]
    async fn test_customer_fetch_failure_fails_consume() {
        let (mock, processor) = setup().await;
        mock.set_unavailable(true);

        let err = consume(&processor, &paid_event(vec![line("prod_A")])).await.unwrap_err();
        assert!(matches!(err, BillingError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_missing_customer_is_malformed() {
        let (_, processor) = setup().await;

        let payload = json!({
            "id": "evt_3",
            "type": "invoice.paid",
            "data": { "object": {
                "id": "in_9",
                "status": "paid",
                "lines": { "data": [line("prod_A")] }
            }}
        })
        .to_string();

        let err = consume(&processor, payload.as_bytes()).await.unwrap_err();
        assert!(matches!(err, BillingError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_expanded_references_and_pricing_details() {
        let (_, processor) = setup().await;

        let payload = json!({
            "id": "evt_4",
            "type": "invoice.paid",
            "data": { "object": {
                "id": "in_9",
                "customer": { "id": "cus_1", "object": "customer" },
                "status": "paid",
                "lines": { "data": [
                    { "id": "il_1", "pricing": { "price_details": { "product": "prod_A" } } }
                ]}
            }}
        })
        .to_string();

        let WebhookOutcome::Paid(event) = consume(&processor, payload.as_bytes()).await.unwrap()
        else {
            panic!("expected paid outcome");
        };
        assert_eq!(event.customer.id, "cus_1");
        assert_eq!(event.product_id.as_deref(), Some("prod_A"));
    }
}
