//! Input validation shared by the client, the poller and the submission path

use std::time::Duration;

use crate::error::{AppError, Result};

/// Longest identifier accepted for path segments and headers
const MAX_IDENTIFIER_LEN: usize = 256;

/// Validate an opaque identifier (job id, company id, ...)
///
/// # Arguments
/// * `field` - Name used in the error message
/// * `value` - The identifier to check
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(AppError::InvalidInput(format!(
            "{} is longer than {} bytes",
            field, MAX_IDENTIFIER_LEN
        )));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(AppError::InvalidInput(format!(
            "{} contains control characters",
            field
        )));
    }
    Ok(())
}

/// Callback URLs must be absolute http(s) URLs
pub fn validate_webhook_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            AppError::InvalidInput(format!("webhook_url must be an http(s) URL: {}", url))
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() || url.chars().any(|c| c.is_whitespace()) {
        return Err(AppError::InvalidInput(format!(
            "webhook_url is not a valid URL: {}",
            url
        )));
    }
    Ok(())
}

/// Poll budget: at least one attempt and a non-zero interval
pub fn validate_poll_settings(max_attempts: u32, interval: Duration) -> Result<()> {
    if max_attempts == 0 {
        return Err(AppError::InvalidInput(
            "max_attempts must be positive".to_string(),
        ));
    }
    if interval.is_zero() {
        return Err(AppError::InvalidInput("interval must be positive".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("job_id", "job_123").is_ok());
        assert!(validate_identifier("job_id", "").is_err());
        assert!(validate_identifier("job_id", "   ").is_err());
        assert!(validate_identifier("job_id", "a\nb").is_err());
        assert!(validate_identifier("job_id", &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_webhook_url() {
        assert!(validate_webhook_url("https://partner.example.com/hooks").is_ok());
        assert!(validate_webhook_url("http://localhost:4000/webhooks/call-analysis").is_ok());
        assert!(validate_webhook_url("https://").is_err());
        assert!(validate_webhook_url("partner.example.com").is_err());
        assert!(validate_webhook_url("https://a b.com").is_err());
    }

    #[test]
    fn test_validate_poll_settings() {
        assert!(validate_poll_settings(60, Duration::from_secs(3)).is_ok());
        assert!(validate_poll_settings(0, Duration::from_secs(3)).is_err());
        assert!(validate_poll_settings(1, Duration::ZERO).is_err());
    }
}
