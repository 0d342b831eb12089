//! Identity Error Types

use checkin_billing::BillingError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Identity and authorization errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Empty or non-institutional email
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// Token missing, malformed, badly signed or expired
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller does not own the requested record
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Processor-side failure
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// User store unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Partial success that needs manual reconciliation
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IdentityError {
    /// Stable reason category for API responses
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::InvalidEmail(_) => "INVALID_EMAIL",
            IdentityError::Unauthorized => "UNAUTHORIZED",
            IdentityError::Forbidden(_) => "FORBIDDEN",
            IdentityError::NotFound(_) => "NOT_FOUND",
            IdentityError::InvalidInput(_) => "INVALID_INPUT",
            IdentityError::Billing(e) => e.code(),
            IdentityError::Storage(_) | IdentityError::Internal(_) => "INTERNAL",
            IdentityError::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            IdentityError::InvalidEmail(msg) | IdentityError::InvalidInput(msg) => msg.clone(),
            IdentityError::Unauthorized => "Authentication required.".into(),
            IdentityError::Forbidden(_) => "You do not have access to this record.".into(),
            IdentityError::NotFound(_) => "The requested record was not found.".into(),
            IdentityError::Billing(e) => e.user_message(),
            IdentityError::Config(_) => "Service configuration error.".into(),
            IdentityError::Storage(_) | IdentityError::Internal(_) => {
                "An error occurred processing your request.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_codes_pass_through() {
        let err: IdentityError = BillingError::Upstream("boom".into()).into();
        assert_eq!(err.code(), "UPSTREAM_FAILURE");
    }

    #[test]
    fn test_forbidden_hides_detail() {
        let err = IdentityError::Forbidden("customer cus_9 belongs to someone else".into());
        assert!(!err.user_message().contains("cus_9"));
    }
}
