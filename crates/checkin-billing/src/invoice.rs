//! Invoice Lifecycle
//!
//! Drives a single-product invoice through the processor's states:
//!
//! ```text
//!   create_draft          finalize             webhook (invoice.paid)
//! ──────────────▶ draft ───────────▶ open ───────────────────────────▶ paid
//! ```
//!
//! `open` is the finalized state: line items are locked and a hosted payment
//! URL exists. Transitions only move forward and there is no cancellation path.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::pricing::TermSchedule;
use crate::processor::PaymentProcessor;

/// Invoice status as reported by the processor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Created, mutable, unbilled
    Draft,
    /// Finalized and payable
    Open,
    /// Payment confirmed (terminal)
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Uncollectible => "uncollectible",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "open" => Some(InvoiceStatus::Open),
            "paid" => Some(InvoiceStatus::Paid),
            "uncollectible" => Some(InvoiceStatus::Uncollectible),
            "void" => Some(InvoiceStatus::Void),
            _ => None,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Open)
                | (InvoiceStatus::Open, InvoiceStatus::Paid)
                | (InvoiceStatus::Open, InvoiceStatus::Uncollectible)
                | (InvoiceStatus::Open, InvoiceStatus::Void)
                | (InvoiceStatus::Uncollectible, InvoiceStatus::Paid)
        )
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice as listed by the processor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: InvoiceStatus,
    /// Amount due in the smallest currency unit
    pub amount_due: i64,
    pub hosted_invoice_url: Option<String>,
    /// Unix timestamp
    pub created: i64,
}

/// Payable reference produced by finalization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutArtifact {
    pub invoice_id: String,
    pub url: String,
}

impl CheckoutArtifact {
    fn from_summary(invoice: &InvoiceSummary) -> Option<Self> {
        invoice.hosted_invoice_url.as_ref().map(|url| Self {
            invoice_id: invoice.id.clone(),
            url: url.clone(),
        })
    }
}

/// Bounds for listing reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListingLimits {
    pub default: u8,
    pub min: u8,
    pub max: u8,
}

impl Default for ListingLimits {
    fn default() -> Self {
        Self {
            default: 10,
            min: 1,
            max: 100,
        }
    }
}

impl ListingLimits {
    /// Read `LIST_DEFAULT_LIMIT`, `LIST_MIN_LIMIT` and `LIST_MAX_LIMIT`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let read = |key: &str, fallback: u8| -> Result<u8> {
            match std::env::var(key) {
                Ok(value) => value
                    .parse()
                    .map_err(|_| BillingError::Config(format!("{key} must be 0-255"))),
                Err(_) => Ok(fallback),
            }
        };

        let limits = Self {
            default: read("LIST_DEFAULT_LIMIT", defaults.default)?,
            min: read("LIST_MIN_LIMIT", defaults.min)?,
            max: read("LIST_MAX_LIMIT", defaults.max)?,
        };

        if limits.min == 0 || limits.min > limits.max {
            return Err(BillingError::Config("listing limits require 1 <= min <= max".into()));
        }
        Ok(limits)
    }

    /// Clamp a requested limit into `[min, max]`; `None` yields the default
    pub fn clamp(&self, requested: Option<i64>) -> u8 {
        let requested = requested.unwrap_or(i64::from(self.default));
        let clamped = requested.clamp(i64::from(self.min), i64::from(self.max));
        u8::try_from(clamped).unwrap_or(self.max)
    }
}

/// Invoice Lifecycle Manager
pub struct InvoiceLifecycle {
    processor: Arc<dyn PaymentProcessor>,
    schedule: TermSchedule,
    limits: ListingLimits,
}

impl InvoiceLifecycle {
    pub fn new(
        processor: Arc<dyn PaymentProcessor>,
        schedule: TermSchedule,
        limits: ListingLimits,
    ) -> Self {
        Self {
            processor,
            schedule,
            limits,
        }
    }

    /// Create a draft invoice for `product_id`, priced by the current term
    pub async fn create_draft(&self, customer_id: &str, product_id: &str) -> Result<String> {
        self.create_draft_on(customer_id, product_id, Utc::now().date_naive())
            .await
    }

    /// Create a draft invoice priced by the term containing `date`
    ///
    /// Nothing is created remotely unless both IDs are present and the price resolves.
    pub async fn create_draft_on(
        &self,
        customer_id: &str,
        product_id: &str,
        date: NaiveDate,
    ) -> Result<String> {
        if customer_id.trim().is_empty() {
            return Err(BillingError::InvalidInput("customer_id is required".into()));
        }
        if product_id.trim().is_empty() {
            return Err(BillingError::InvalidInput("product_id is required".into()));
        }

        let price_id = self.schedule.price_for(product_id, date)?;

        let invoice_id = self.processor.create_draft_invoice(customer_id).await?;
        self.processor
            .add_invoice_item(customer_id, &invoice_id, price_id)
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            customer_id = %customer_id,
            product_id = %product_id,
            price_id = %price_id,
            term = self.schedule.term_on(date).as_str(),
            "Created draft invoice"
        );

        Ok(invoice_id)
    }

    /// Finalize a draft and return its payable reference
    ///
    /// Finalizing an invoice twice is rejected by the processor, not here.
    pub async fn finalize(&self, invoice_id: &str) -> Result<CheckoutArtifact> {
        if invoice_id.trim().is_empty() {
            return Err(BillingError::InvalidInput("invoice_id is required".into()));
        }

        let invoice = self.processor.finalize_invoice(invoice_id).await?;

        let artifact = CheckoutArtifact::from_summary(&invoice).ok_or_else(|| {
            BillingError::Upstream(format!("no payment URL returned for {invoice_id}"))
        })?;

        tracing::info!(invoice_id = %invoice_id, status = %invoice.status, "Finalized invoice");

        Ok(artifact)
    }

    /// Create, price and finalize in one step
    pub async fn issue(&self, customer_id: &str, product_id: &str) -> Result<CheckoutArtifact> {
        let invoice_id = self.create_draft(customer_id, product_id).await?;
        self.finalize(&invoice_id).await
    }

    /// Current processor view of an invoice
    pub async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        if invoice_id.trim().is_empty() {
            return Err(BillingError::InvalidInput("invoice_id is required".into()));
        }
        self.processor.get_invoice(invoice_id).await
    }

    /// Read-through status, never cached
    pub async fn get_status(&self, invoice_id: &str) -> Result<InvoiceStatus> {
        Ok(self.get_invoice(invoice_id).await?.status)
    }

    /// Most recent invoices; `limit` is clamped to the configured bounds
    pub async fn list_invoices(&self, limit: Option<i64>) -> Result<Vec<InvoiceSummary>> {
        self.processor
            .list_invoices(self.limits.clamp(limit), None)
            .await
    }

    /// Finalized invoices that still carry a payable URL
    pub async fn list_checkout_artifacts(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<CheckoutArtifact>> {
        let invoices = self
            .processor
            .list_invoices(self.limits.clamp(limit), Some(InvoiceStatus::Open))
            .await?;

        Ok(invoices
            .iter()
            .filter_map(CheckoutArtifact::from_summary)
            .collect())
    }

    pub fn limits(&self) -> ListingLimits {
        self.limits
    }
}
