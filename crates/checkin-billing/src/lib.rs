//! # checkin-billing
//!
//! Payment processor integration for checkin: term-priced invoices, hosted
//! payment URLs and verified payment webhooks.
//!
//! ## Invoice Flow
//!
//! ```text
//! ┌──────────────┐  create_draft   ┌─────────┐  finalize  ┌────────┐  invoice.paid  ┌────────┐
//! │  Our Server  │────────────────▶│  draft  │───────────▶│  open  │───────────────▶│  paid  │
//! └──────────────┘  (one line)     └─────────┘  (pay URL) └────────┘   (webhook)    └────────┘
//! ```
//!
//! Every remote call goes through the [`PaymentProcessor`] trait. Production
//! uses [`StripeProcessor`]; tests and local runs use [`MockProcessor`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkin_billing::{InvoiceLifecycle, ListingLimits, StripeProcessor, TermSchedule};
//!
//! let processor = Arc::new(StripeProcessor::from_env()?);
//! let lifecycle = InvoiceLifecycle::new(processor, TermSchedule::from_env()?, ListingLimits::default());
//!
//! let invoice_id = lifecycle.create_draft("cus_123", "prod_A").await?;
//! let artifact = lifecycle.finalize(&invoice_id).await?;
//! // Send the customer to: artifact.url
//! ```

mod customer;
mod error;
mod invoice;
mod ledger;
mod mock;
mod pricing;
mod processor;
mod stripe_processor;
mod webhook;

pub mod signature;

pub use customer::{CustomerPatch, INSTITUTIONAL_ID_METADATA_KEY, NewCustomer, RemoteCustomer};
pub use error::{BillingError, Result};
pub use invoice::{CheckoutArtifact, InvoiceLifecycle, InvoiceStatus, InvoiceSummary, ListingLimits};
pub use ledger::{MemoryPaymentLedger, PaymentLedger};
pub use mock::MockProcessor;
pub use pricing::{Term, TermPrices, TermSchedule};
pub use processor::PaymentProcessor;
pub use stripe_processor::StripeProcessor;
pub use webhook::{INVOICE_PAID, PaymentEvent, WebhookConfig, WebhookOutcome, WebhookProcessor};
