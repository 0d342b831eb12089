//! checkin HTTP Server
//!
//! Axum-based server exposing identity tokens, customer records, term
//! invoices and the processor webhook.

mod auth;
mod config;
mod error;
mod handlers;
mod state;

use std::sync::Arc;

use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkin_billing::{
    InvoiceLifecycle, ListingLimits, MemoryPaymentLedger, MockProcessor, PaymentProcessor,
    StripeProcessor, TermSchedule, WebhookConfig, WebhookProcessor,
};
use checkin_identity::{IdentityResolver, MemoryUserStore, TokenConfig, TokenService};

use crate::config::{ProcessorKind, ServerConfig};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    let tokens = Arc::new(TokenService::new(TokenConfig::from_env()?)?);

    // Payment processor
    let processor: Arc<dyn PaymentProcessor> = match config.processor {
        ProcessorKind::Stripe => Arc::new(StripeProcessor::from_env()?),
        ProcessorKind::Mock => {
            tracing::warn!("⚠ Using in-memory mock processor - no real payments");
            Arc::new(MockProcessor::new())
        }
    };
    tracing::info!("✓ Payment processor: {}", processor.name());

    let schedule = TermSchedule::from_env()?;
    tracing::info!("✓ Loaded prices for {} products", schedule.products.len());

    let invoices = Arc::new(InvoiceLifecycle::new(
        processor.clone(),
        schedule,
        ListingLimits::from_env()?,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(
        WebhookConfig::from_env()?,
        processor.clone(),
    ));

    if config.admin_emails.is_empty() {
        tracing::warn!("⚠ ADMIN_EMAILS not set - listing endpoints disabled");
    }

    // Build application state
    let state = AppState {
        tokens,
        resolver: Arc::new(IdentityResolver::new(
            Arc::new(MemoryUserStore::new()),
            processor.clone(),
        )),
        invoices,
        webhooks,
        ledger: Arc::new(MemoryPaymentLedger::new()),
        admins: Arc::new(config.admin_emails.clone()),
        processor_name: processor.name().to_string(),
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 checkin server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET   /health                       - Health check");
    tracing::info!("  POST  /verify-email                 - Issue identity token");
    tracing::info!("  POST  /customer                     - Resolve or create customer");
    tracing::info!("  GET   /customer                     - Look up customer");
    tracing::info!("  PATCH /customer                     - Update customer");
    tracing::info!("  POST  /invoice                      - Create term invoice");
    tracing::info!("  GET   /invoices/{{id}}/status         - Invoice status");
    tracing::info!("  GET   /invoices                     - List invoices (admin)");
    tracing::info!("  GET   /checkout-sessions            - List open invoices (admin)");
    tracing::info!("  POST  /webhook/stripe               - Payment webhook");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
