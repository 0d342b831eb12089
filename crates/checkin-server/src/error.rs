//! API Error Responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use checkin_billing::BillingError;
use checkin_identity::IdentityError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn forbidden() -> Self {
        IdentityError::Forbidden(String::new()).into()
    }
}

fn billing_status(err: &BillingError) -> StatusCode {
    match err {
        BillingError::InvalidInput(_)
        | BillingError::BadSignature(_)
        | BillingError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        BillingError::Upstream(_) => StatusCode::BAD_GATEWAY,
        BillingError::Config(_) | BillingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let status = billing_status(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, "Billing operation failed");
        }
        Self {
            status,
            code: err.code(),
            message: err.user_message(),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match &err {
            IdentityError::InvalidEmail(_) | IdentityError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            IdentityError::Unauthorized => StatusCode::UNAUTHORIZED,
            IdentityError::Forbidden(_) => StatusCode::FORBIDDEN,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::Billing(inner) => billing_status(inner),
            IdentityError::Storage(_) | IdentityError::Internal(_) | IdentityError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Identity operation failed");
        }
        Self {
            status,
            code: err.code(),
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.into(),
            }),
        )
            .into_response()
    }
}
