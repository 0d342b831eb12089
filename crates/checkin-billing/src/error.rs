//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Billing-related errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Missing or malformed required field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No matching record at the processor
    #[error("Not found: {0}")]
    NotFound(String),

    /// Processor call failed
    #[error("Payment processor error: {0}")]
    Upstream(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    BadSignature(String),

    /// Webhook payload is signed but structurally unacceptable
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BillingError {
    /// Stable reason category for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidInput(_) => "INVALID_INPUT",
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::Upstream(_) => "UPSTREAM_FAILURE",
            BillingError::BadSignature(_) => "BAD_SIGNATURE",
            BillingError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            BillingError::Config(_) => "CONFIGURATION_ERROR",
            BillingError::Storage(_) => "INTERNAL",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            BillingError::InvalidInput(msg) => msg.clone(),
            BillingError::NotFound(_) => "The requested record was not found.".into(),
            BillingError::Upstream(_) => "Payment processing failed. Please try again.".into(),
            BillingError::BadSignature(_) => "Webhook signature could not be verified.".into(),
            BillingError::MalformedPayload(msg) => format!("Webhook payload rejected: {msg}"),
            BillingError::Config(_) => "Service configuration error.".into(),
            BillingError::Storage(_) => "An error occurred processing your request.".into(),
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(ref req) if req.http_status == 404 => {
                BillingError::NotFound(err.to_string())
            }
            other => BillingError::Upstream(other.to_string()),
        }
    }
}
