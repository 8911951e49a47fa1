use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base URL of the partner API, e.g. `https://host/api/partner/v1`
    pub api_base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Shared secret used by the issuer to sign webhook bodies
    pub webhook_secret: String,
    pub webhook_path: String,
    pub poll_max_attempts: u32,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub submit_retries: u32,
    pub webhook_rate_limit_per_minute: u32,
    pub max_body_kb: usize,
    /// SQLite URL for finalized job markers; in-memory markers when unset
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            api_base_url: "http://localhost:3000/api/partner/v1".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            webhook_secret: String::new(),
            webhook_path: "/webhooks/call-analysis".to_string(),
            poll_max_attempts: 60,
            poll_interval_secs: 3,
            request_timeout_secs: 30,
            submit_retries: 2,
            webhook_rate_limit_per_minute: 120,
            max_body_kb: 1024,
            database_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("CALLWATCH_HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("CALLWATCH_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        if let Ok(url) = std::env::var("PARTNER_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var("PARTNER_API_KEY") {
            config.api_key = key;
        }

        if let Ok(secret) = std::env::var("PARTNER_API_SECRET") {
            config.api_secret = secret;
        }

        if let Ok(secret) = std::env::var("WEBHOOK_SECRET") {
            config.webhook_secret = secret;
        }

        if let Ok(path) = std::env::var("CALLWATCH_WEBHOOK_PATH") {
            if path.starts_with('/') {
                config.webhook_path = path;
            }
        }

        if let Ok(attempts) = std::env::var("CALLWATCH_POLL_MAX_ATTEMPTS") {
            if let Ok(a) = attempts.parse() {
                config.poll_max_attempts = a;
            }
        }

        if let Ok(interval) = std::env::var("CALLWATCH_POLL_INTERVAL_SECS") {
            if let Ok(i) = interval.parse() {
                config.poll_interval_secs = i;
            }
        }

        if let Ok(timeout) = std::env::var("CALLWATCH_REQUEST_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                config.request_timeout_secs = t;
            }
        }

        if let Ok(retries) = std::env::var("CALLWATCH_SUBMIT_RETRIES") {
            if let Ok(r) = retries.parse() {
                config.submit_retries = r;
            }
        }

        if let Ok(limit) = std::env::var("CALLWATCH_WEBHOOK_RATE_LIMIT") {
            if let Ok(l) = limit.parse() {
                config.webhook_rate_limit_per_minute = l;
            }
        }

        if let Ok(size) = std::env::var("CALLWATCH_MAX_BODY_KB") {
            if let Ok(s) = size.parse() {
                config.max_body_kb = s;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_kb * 1024
    }

    /// Credentials needed by the outbound client
    pub fn validate_client(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AppError::Config("PARTNER_API_KEY is not set".to_string()));
        }
        if self.api_secret.is_empty() {
            return Err(AppError::Config("PARTNER_API_SECRET is not set".to_string()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "PARTNER_API_URL must be an http(s) URL: {}",
                self.api_base_url
            )));
        }
        Ok(())
    }

    /// Settings needed by the webhook receiver
    pub fn validate_receiver(&self) -> Result<()> {
        if self.webhook_secret.is_empty() {
            return Err(AppError::Config("WEBHOOK_SECRET is not set".to_string()));
        }
        if self.webhook_rate_limit_per_minute == 0 {
            return Err(AppError::Config(
                "CALLWATCH_WEBHOOK_RATE_LIMIT must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Header names shared with the partner API
pub mod headers {
    pub const API_SECRET: &str = "X-API-Secret";
    pub const IDEMPOTENCY_KEY: &str = "X-Idempotency-Key";
    pub const SIGNATURE: &str = "X-Partner-Signature";
    pub const WEBHOOK_ATTEMPT: &str = "X-Webhook-Attempt";
    pub const WEBHOOK_ID: &str = "X-Webhook-ID";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_max_attempts, 60);
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.webhook_path, "/webhooks/call-analysis");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_validate_client_requires_credentials() {
        let mut config = Config::default();
        assert!(config.validate_client().is_err());

        config.api_key = "key".to_string();
        config.api_secret = "secret".to_string();
        assert!(config.validate_client().is_ok());

        config.api_base_url = "ftp://nope".to_string();
        assert!(config.validate_client().is_err());
    }

    #[test]
    fn test_validate_receiver_requires_secret() {
        let mut config = Config::default();
        assert!(config.validate_receiver().is_err());

        config.webhook_secret = "whsec".to_string();
        assert!(config.validate_receiver().is_ok());
    }
}
