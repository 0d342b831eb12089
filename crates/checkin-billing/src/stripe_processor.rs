//! Stripe Payment Processor
//!
//! Live [`PaymentProcessor`] backed by the Stripe API. Invoices are created
//! with `auto_advance` off so they stay in `draft` until finalized explicitly.

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    Client, CreateCustomer, CreateInvoice, CreateInvoiceItem, Customer, CustomerId,
    CustomerSearchParams, Invoice, InvoiceId, InvoiceItem, ListInvoices, PriceId,
    UpdateCustomer,
};

use crate::customer::{
    CustomerPatch, INSTITUTIONAL_ID_METADATA_KEY, NewCustomer, RemoteCustomer,
};
use crate::error::{BillingError, Result};
use crate::invoice::{InvoiceStatus, InvoiceSummary};
use crate::processor::PaymentProcessor;

/// Stripe client wrapper
pub struct StripeProcessor {
    client: Client,
}

impl StripeProcessor {
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
        }
    }

    /// Create from `STRIPE_API_KEY`
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_API_KEY")
            .map_err(|_| BillingError::Config("STRIPE_API_KEY not set".into()))?;
        if secret_key.trim().is_empty() {
            return Err(BillingError::Config("STRIPE_API_KEY is empty".into()));
        }
        Ok(Self::new(&secret_key))
    }

    async fn search(&self, query: String) -> Result<Vec<RemoteCustomer>> {
        let params = CustomerSearchParams {
            query,
            ..Default::default()
        };
        let found = Customer::search(&self.client, params).await?;
        Ok(found.data.iter().map(map_customer).collect())
    }
}

fn parse_customer_id(id: &str) -> Result<CustomerId> {
    id.parse::<CustomerId>()
        .map_err(|e| BillingError::InvalidInput(format!("invalid customer id {id}: {e}")))
}

fn parse_invoice_id(id: &str) -> Result<InvoiceId> {
    id.parse::<InvoiceId>()
        .map_err(|e| BillingError::InvalidInput(format!("invalid invoice id {id}: {e}")))
}

fn map_customer(customer: &Customer) -> RemoteCustomer {
    RemoteCustomer {
        id: customer.id.to_string(),
        email: customer.email.clone(),
        name: customer.name.clone(),
        institutional_id: customer
            .metadata
            .as_ref()
            .and_then(|m| m.get(INSTITUTIONAL_ID_METADATA_KEY))
            .cloned(),
    }
}

fn map_status(status: Option<stripe::InvoiceStatus>) -> InvoiceStatus {
    match status {
        Some(stripe::InvoiceStatus::Open) => InvoiceStatus::Open,
        Some(stripe::InvoiceStatus::Paid) => InvoiceStatus::Paid,
        Some(stripe::InvoiceStatus::Uncollectible) => InvoiceStatus::Uncollectible,
        Some(stripe::InvoiceStatus::Void) => InvoiceStatus::Void,
        Some(stripe::InvoiceStatus::Draft) | None => InvoiceStatus::Draft,
    }
}

fn to_stripe_status(status: InvoiceStatus) -> stripe::InvoiceStatus {
    match status {
        InvoiceStatus::Draft => stripe::InvoiceStatus::Draft,
        InvoiceStatus::Open => stripe::InvoiceStatus::Open,
        InvoiceStatus::Paid => stripe::InvoiceStatus::Paid,
        InvoiceStatus::Uncollectible => stripe::InvoiceStatus::Uncollectible,
        InvoiceStatus::Void => stripe::InvoiceStatus::Void,
    }
}

fn map_invoice(invoice: &Invoice) -> InvoiceSummary {
    InvoiceSummary {
        id: invoice.id.to_string(),
        customer_id: invoice.customer.as_ref().map(|c| c.id().to_string()),
        status: map_status(invoice.status),
        amount_due: invoice.amount_due.unwrap_or_default(),
        hosted_invoice_url: invoice.hosted_invoice_url.clone(),
        created: invoice.created.unwrap_or_default(),
    }
}

/// Stripe search query values are single-quoted; escape embedded quotes
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn get_customer(&self, customer_id: &str) -> Result<RemoteCustomer> {
        let id = parse_customer_id(customer_id)?;
        let customer = Customer::retrieve(&self.client, &id, &[]).await?;
        if customer.deleted {
            return Err(BillingError::NotFound(format!("customer {customer_id} was deleted")));
        }
        Ok(map_customer(&customer))
    }

    async fn search_customers_by_email(&self, email: &str) -> Result<Vec<RemoteCustomer>> {
        self.search(format!("email:{}", quote(email))).await
    }

    async fn search_customers_by_institutional_id(
        &self,
        institutional_id: &str,
    ) -> Result<Vec<RemoteCustomer>> {
        self.search(format!(
            "metadata['{INSTITUTIONAL_ID_METADATA_KEY}']:{}",
            quote(institutional_id)
        ))
        .await
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<RemoteCustomer> {
        let mut params = CreateCustomer::new();
        params.email = Some(&customer.email);
        params.name = customer.name.as_deref();
        if let Some(ref institutional_id) = customer.institutional_id {
            let mut metadata = HashMap::new();
            metadata.insert(
                INSTITUTIONAL_ID_METADATA_KEY.to_string(),
                institutional_id.clone(),
            );
            params.metadata = Some(metadata);
        }

        let created = Customer::create(&self.client, params).await?;
        tracing::info!(customer_id = %created.id, "Created Stripe customer");
        Ok(map_customer(&created))
    }

    async fn update_customer(
        &self,
        customer_id: &str,
        patch: &CustomerPatch,
    ) -> Result<RemoteCustomer> {
        let id = parse_customer_id(customer_id)?;

        let mut params = UpdateCustomer::new();
        params.name = patch.name.as_deref();
        if let Some(ref institutional_id) = patch.institutional_id {
            let mut metadata = HashMap::new();
            metadata.insert(
                INSTITUTIONAL_ID_METADATA_KEY.to_string(),
                institutional_id.clone(),
            );
            params.metadata = Some(metadata);
        }

        let updated = Customer::update(&self.client, &id, params).await?;
        Ok(map_customer(&updated))
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let id = parse_customer_id(customer_id)?;
        Customer::delete(&self.client, &id).await?;
        tracing::info!(customer_id = %customer_id, "Deleted Stripe customer");
        Ok(())
    }

    async fn create_draft_invoice(&self, customer_id: &str) -> Result<String> {
        let id = parse_customer_id(customer_id)?;

        let mut params = CreateInvoice::new();
        params.customer = Some(id);
        params.auto_advance = Some(false);

        let invoice = Invoice::create(&self.client, params).await?;
        Ok(invoice.id.to_string())
    }

    async fn add_invoice_item(
        &self,
        customer_id: &str,
        invoice_id: &str,
        price_id: &str,
    ) -> Result<()> {
        let customer = parse_customer_id(customer_id)?;
        let invoice = parse_invoice_id(invoice_id)?;
        let price = price_id
            .parse::<PriceId>()
            .map_err(|e| BillingError::Config(format!("invalid price id {price_id}: {e}")))?;

        let mut params = CreateInvoiceItem::new(customer);
        params.invoice = Some(invoice);
        params.price = Some(price);

        InvoiceItem::create(&self.client, params).await?;
        Ok(())
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        let id = parse_invoice_id(invoice_id)?;
        let invoice = Invoice::finalize(&self.client, &id, Default::default()).await?;
        Ok(map_invoice(&invoice))
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceSummary> {
        let id = parse_invoice_id(invoice_id)?;
        let invoice = Invoice::retrieve(&self.client, &id, &[]).await?;
        Ok(map_invoice(&invoice))
    }

    async fn list_invoices(
        &self,
        limit: u8,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<InvoiceSummary>> {
        let mut params = ListInvoices::new();
        params.limit = Some(u64::from(limit));
        params.status = status.map(to_stripe_status);

        let invoices = Invoice::list(&self.client, &params).await?;
        Ok(invoices.data.iter().map(map_invoice).collect())
    }

    fn name(&self) -> &str {
        "Stripe"
    }
}
