//! HTTP Handlers

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use checkin_billing::{
    BillingError, CheckoutArtifact, CustomerPatch, InvoiceStatus, InvoiceSummary, RemoteCustomer,
    WebhookOutcome,
};
use checkin_identity::{CustomerProfile, CustomerSelector};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the processor's webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub processor: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    pub token: String,
    pub email: String,
    pub expires_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerQuery {
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub institutional_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    #[serde(default)]
    pub product_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateInvoiceResponse {
    pub invoice_id: String,
    pub payment_url: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceStatusResponse {
    pub invoice_id: String,
    pub status: InvoiceStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/verify-email", post(verify_email))
        .route(
            "/customer",
            get(get_customer).post(post_customer).patch(patch_customer),
        )
        .route("/invoice", post(post_invoice))
        .route("/invoices", get(list_invoices))
        .route("/invoices/{invoice_id}/status", get(invoice_status))
        .route("/checkout-sessions", get(list_checkout_sessions))
        .route("/webhook/stripe", post(stripe_webhook))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        processor: state.processor_name.clone(),
    })
}

/// Issue a token for an institutional email
///
/// Delivery by mail is handled elsewhere; the token is returned directly.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<VerifyEmailResponse>, ApiError> {
    let issued = state.tokens.issue_token(&payload.email)?;

    tracing::info!(expires_at = %issued.expires_at, "Issued identity token");

    Ok(Json(VerifyEmailResponse {
        token: issued.token,
        email: issued.email,
        expires_at: issued.expires_at.to_rfc3339(),
    }))
}

/// Resolve or create the caller's customer
pub async fn post_customer(
    State(state): State<AppState>,
    caller: Caller,
    payload: Option<Json<CustomerProfile>>,
) -> Result<(StatusCode, Json<RemoteCustomer>), ApiError> {
    let profile = payload.map(|Json(p)| p).unwrap_or_default();
    let resolution = state.resolver.resolve_or_create(&caller.email, profile).await?;

    let status = if resolution.created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(resolution.customer)))
}

/// Look up a customer by exactly one selector
pub async fn get_customer(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<RemoteCustomer>, ApiError> {
    let selector =
        CustomerSelector::from_parts(query.customer_id, query.email, query.institutional_id)?;
    let customer = state.resolver.lookup(selector, &caller.fingerprint).await?;
    Ok(Json(customer))
}

/// Patch the caller's own customer
pub async fn patch_customer(
    State(state): State<AppState>,
    caller: Caller,
    Json(patch): Json<CustomerPatch>,
) -> Result<Json<RemoteCustomer>, ApiError> {
    let customer = state.resolver.update_own(&caller.fingerprint, &patch).await?;
    Ok(Json(customer))
}

/// Create and finalize a single-product invoice for the caller
pub async fn post_invoice(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<Json<CreateInvoiceResponse>, ApiError> {
    if payload.product_id.trim().is_empty() {
        return Err(BillingError::InvalidInput("product_id is required".into()).into());
    }

    let resolution = state
        .resolver
        .resolve_or_create(&caller.email, CustomerProfile::default())
        .await?;

    let artifact = state
        .invoices
        .issue(&resolution.customer.id, &payload.product_id)
        .await?;

    Ok(Json(CreateInvoiceResponse {
        invoice_id: artifact.invoice_id,
        payment_url: artifact.url,
    }))
}

/// Current status of one of the caller's invoices
pub async fn invoice_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(invoice_id): Path<String>,
) -> Result<Json<InvoiceStatusResponse>, ApiError> {
    let owned = state.resolver.mapped_customer_id(&caller.fingerprint).await?;
    let invoice = state.invoices.get_invoice(&invoice_id).await?;

    if owned.is_none() || invoice.customer_id != owned {
        return Err(ApiError::forbidden());
    }

    Ok(Json(InvoiceStatusResponse {
        invoice_id: invoice.id,
        status: invoice.status,
    }))
}

fn require_admin(state: &AppState, caller: &Caller) -> Result<(), ApiError> {
    if state.is_admin(&caller.email) {
        Ok(())
    } else {
        tracing::warn!(fingerprint = %caller.fingerprint, "Listing denied");
        Err(ApiError::forbidden())
    }
}

/// Most recent invoices (admin)
pub async fn list_invoices(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<InvoiceSummary>>, ApiError> {
    require_admin(&state, &caller)?;
    Ok(Json(state.invoices.list_invoices(query.limit).await?))
}

/// Open invoices with a payable URL (admin)
pub async fn list_checkout_sessions(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CheckoutArtifact>>, ApiError> {
    require_admin(&state, &caller)?;
    Ok(Json(state.invoices.list_checkout_artifacts(query.limit).await?))
}

/// Payment processor webhook
///
/// The body is taken as raw bytes; nothing is parsed before the signature
/// check. Irrelevant events are acknowledged with 200.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| BillingError::BadSignature("missing signature header".into()))?;

    match state.webhooks.consume(&body, signature).await? {
        WebhookOutcome::Paid(event) => {
            state.ledger.record_paid(&event).await?;
        }
        WebhookOutcome::Ignored { .. } => {}
    }

    Ok(Json(WebhookAck { status: "ok" }))
}
