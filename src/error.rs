use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Submission rejected ({status}): {message}")]
    Submission { status: u16, message: String },

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("No terminal state after {attempts} status checks")]
    PollTimeout { attempts: u32 },

    #[error("Polling cancelled")]
    Cancelled,

    #[error("Webhook signature verification failed")]
    SignatureVerification,

    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("Partner API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport-level failures that are safe to resend with the same idempotency key
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Submission { .. } | AppError::Api { .. } => StatusCode::BAD_GATEWAY,
            AppError::JobFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PollTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SignatureVerification => StatusCode::UNAUTHORIZED,
            AppError::MalformedEvent(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Http(_)
            | AppError::Database(_)
            | AppError::Json(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match &self {
            // No detail for the issuer beyond the status code
            AppError::SignatureVerification => "Unauthorized".to_string(),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "Internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_error_hides_detail() {
        let response = AppError::SignatureVerification.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_error_is_500() {
        let response = AppError::Internal("secret path /etc/x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_only_http_errors_are_transient() {
        assert!(!AppError::JobFailed("x".to_string()).is_transient());
        assert!(!AppError::Submission {
            status: 500,
            message: "boom".to_string()
        }
        .is_transient());
    }
}
