//! Mock Payment Processor
//!
//! In-memory processor for tests and local development. IDs are sequential
//! (`cus_1`, `in_1`, ...) and invoice state follows the same forward-only
//! lifecycle the real processor enforces.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::customer::{CustomerPatch, NewCustomer, RemoteCustomer};
use crate::error::{BillingError, Result};
use crate::invoice::{InvoiceStatus, InvoiceSummary};
use crate::processor::PaymentProcessor;

#[derive(Clone, Debug)]
struct MockInvoice {
    summary: InvoiceSummary,
    prices: Vec<String>,
}

#[derive(Default)]
struct MockState {
    customers: Vec<RemoteCustomer>,
    deleted: Vec<String>,
    invoices: Vec<MockInvoice>,
}

/// Mock processor with in-memory customers and invoices
pub struct MockProcessor {
    state: RwLock<MockState>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    fail_deletes: AtomicBool,
    created_customers: AtomicU64,
    /// Unit price charged per line item
    unit_amount: i64,
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::with_unit_amount(5000)
    }

    /// Create with a fixed price per line item
    pub fn with_unit_amount(unit_amount: i64) -> Self {
        Self {
            state: RwLock::new(MockState::default()),
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            created_customers: AtomicU64::new(0),
            unit_amount,
        }
    }

    /// Make every call fail as if the processor were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make customer deletion fail
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Seed a customer created out of band
    pub async fn insert_customer(&self, customer: RemoteCustomer) {
        self.state.write().await.customers.push(customer);
    }

    /// Number of live customers
    pub async fn customer_count(&self) -> usize {
        self.state.read().await.customers.len()
    }

    /// Number of customers created through `create_customer`
    pub fn created_customer_count(&self) -> u64 {
        self.created_customers.load(Ordering::SeqCst)
    }

    /// IDs of customers removed through `delete_customer`
    pub async fn deleted_customers(&self) -> Vec<String> {
        self.state.read().await.deleted.clone()
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.read().await.invoices.len()
    }

    /// Price IDs attached to an invoice
    pub async fn invoice_prices(&self, invoice_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .invoices
            .iter()
            .find(|i| i.summary.id == invoice_id)
            .map(|i| i.prices.clone())
            .unwrap_or_default()
    }

    /// Simulate the customer paying a finalized invoice
    pub async fn mark_paid(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        let mut state = self.state.write().await;
        let invoice = find_invoice(&mut state, invoice_id)?;
        transition(invoice, InvoiceStatus::Paid)?;
        Ok(invoice.summary.clone())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::Upstream("mock processor unavailable".into()));
        }
        Ok(())
    }
}

fn find_invoice<'a>(state: &'a mut MockState, invoice_id: &str) -> Result<&'a mut MockInvoice> {
    state
        .invoices
        .iter_mut()
        .find(|i| i.summary.id == invoice_id)
        .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))
}

fn transition(invoice: &mut MockInvoice, next: InvoiceStatus) -> Result<()> {
    let current = invoice.summary.status;
    if !current.can_transition_to(next) {
        return Err(BillingError::Upstream(format!(
            "invoice {} is {current}, cannot become {next}",
            invoice.summary.id
        )));
    }
    invoice.summary.status = next;
    Ok(())
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn get_customer(&self, customer_id: &str) -> Result<RemoteCustomer> {
        self.check_available()?;
        self.state
            .read()
            .await
            .customers
            .iter()
            .find(|c| c.id == customer_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("customer {customer_id}")))
    }

    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<RemoteCustomer>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .customers
            .iter()
            .filter(|c| c.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn search_customers_by_institutional_id(
        &self,
        institutional_id: &str,
    ) -> Result<Vec<RemoteCustomer>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .customers
            .iter()
            .filter(|c| c.institutional_id.as_deref() == Some(institutional_id))
            .cloned()
            .collect())
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<RemoteCustomer> {
        self.check_available()?;
        let created = RemoteCustomer {
            id: self.next("cus"),
            email: Some(customer.email),
            name: customer.name,
            institutional_id: customer.institutional_id,
        };
        self.state.write().await.customers.push(created.clone());
        self.created_customers.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &CustomerPatch,
    ) -> Result<RemoteCustomer> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let customer = state
            .customers
            .iter_mut()
            .find(|c| c.id == customer_id)
            .ok_or_else(|| BillingError::NotFound(format!("customer {customer_id}")))?;
        patch.apply_to(customer);
        Ok(customer.clone())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BillingError::Upstream(format!("cannot delete {customer_id}")));
        }
        let mut state = self.state.write().await;
        let before = state.customers.len();
        state.customers.retain(|c| c.id != customer_id);
        if state.customers.len() == before {
            return Err(BillingError::NotFound(format!("customer {customer_id}")));
        }
        state.deleted.push(customer_id.to_string());
        Ok(())
    }

    async fn create_draft_invoice(&self, customer_id: &str) -> Result<String> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.customers.iter().any(|c| c.id == customer_id) {
            return Err(BillingError::NotFound(format!("customer {customer_id}")));
        }
        let id = self.next("in");
        state.invoices.push(MockInvoice {
            summary: InvoiceSummary {
                id: id.clone(),
                customer_id: Some(customer_id.to_string()),
                status: InvoiceStatus::Draft,
                amount_due: 0,
                hosted_invoice_url: None,
                created: Utc::now().timestamp(),
            },
            prices: Vec::new(),
        });
        Ok(id)
    }

    async fn add_invoice_item(
        &self,
        customer_id: &str,
        invoice_id: &str,
        price_id: &str,
    ) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let invoice = find_invoice(&mut state, invoice_id)?;
        if invoice.summary.customer_id.as_deref() != Some(customer_id) {
            return Err(BillingError::Upstream(format!(
                "invoice {invoice_id} belongs to another customer"
            )));
        }
        if invoice.summary.status != InvoiceStatus::Draft {
            return Err(BillingError::Upstream(format!("invoice {invoice_id} is not a draft")));
        }
        invoice.prices.push(price_id.to_string());
        invoice.summary.amount_due += self.unit_amount;
        Ok(())
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let invoice = find_invoice(&mut state, invoice_id)?;
        transition(invoice, InvoiceStatus::Open)?;
        invoice.summary.hosted_invoice_url =
            Some(format!("https://invoice.mock.test/{invoice_id}"));
        Ok(invoice.summary.clone())
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        self.check_available()?;
        let mut state = self.state.write().await;
        Ok(find_invoice(&mut state, invoice_id)?.summary.clone())
    }

    async fn list_invoices(
        &self,
        limit: u8,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<InvoiceSummary>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .invoices
            .iter()
            .rev()
            .filter(|i| status.is_none_or(|s| i.summary.status == s))
            .take(usize::from(limit))
            .map(|i| i.summary.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "MockProcessor"
    }
}
