//! Payment Processor Strategy
//!
//! Every remote call the billing core makes goes through this trait, so the
//! live Stripe client and the in-memory mock are interchangeable.
//!
//! Implementations never retry. A failed call surfaces as
//! [`BillingError::Upstream`](crate::BillingError::Upstream) (or `NotFound`)
//! and retry is left to the client or operator.

use async_trait::async_trait;

use crate::customer::{CustomerPatch, NewCustomer, RemoteCustomer};
use crate::error::Result;
use crate::invoice::{InvoiceStatus, InvoiceSummary};

/// Payment processor client trait (Strategy pattern)
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetch a customer by processor ID
    async fn get_customer(&self, customer_id: &str) -> Result<RemoteCustomer>;

    /// Customers whose email equals `email` (already normalized), in processor order
    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<RemoteCustomer>>;

    /// Customers tagged with the given institutional id
    async fn search_customers_by_institutional_id(
        &self,
        institutional_id: &str,
    ) -> Result<Vec<RemoteCustomer>>;

    /// Create a customer
    async fn create_customer(&self, customer: NewCustomer) -> Result<RemoteCustomer>;

    /// Patch a customer
    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &CustomerPatch,
    ) -> Result<RemoteCustomer>;

    /// Delete a customer
    async fn delete_customer(&self, customer_id: &str) -> Result<()>;

    /// Create an empty draft invoice and return its ID
    async fn create_draft_invoice(&self, customer_id: &str) -> Result<String>;

    /// Attach one line item for `price_id` to a draft invoice
    async fn add_invoice_item(
        &self,
        customer_id: &str,
        invoice_id: &str,
        price_id: &str,
    ) -> Result<()>;

    /// Finalize a draft invoice, locking its line items
    async fn finalize_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary>;

    /// Fetch an invoice
    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary>;

    /// Most recent invoices, newest first
    async fn list_invoices(
        &self,
        limit: u8,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<InvoiceSummary>>;

    /// Processor name
    fn name(&self) -> &str;
}
