//! Application State

use std::collections::HashSet;
use std::sync::Arc;

use checkin_billing::{InvoiceLifecycle, PaymentLedger, WebhookProcessor};
use checkin_identity::{IdentityResolver, TokenService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Issues and validates bearer tokens
    pub tokens: Arc<TokenService>,

    /// Email → processor customer mapping
    pub resolver: Arc<IdentityResolver>,

    pub invoices: Arc<InvoiceLifecycle>,

    pub webhooks: Arc<WebhookProcessor>,

    /// Records confirmed payments
    pub ledger: Arc<dyn PaymentLedger>,

    /// Normalized emails allowed to list invoices
    pub admins: Arc<HashSet<String>>,

    /// Processor name, for health output
    pub processor_name: String,
}

impl AppState {
    pub fn is_admin(&self, email: &str) -> bool {
        self.admins.contains(email)
    }
}
