//! HTTP client for the partner call analysis API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::{headers, Config};
use crate::error::{AppError, Result};
use crate::models::{
    ApiErrorEnvelope, CallSubmission, CreateAgentRequest, CreateCompanyRequest,
    CreateAgentResponse, CreateCompanyResponse, JobStatusResponse, PartnerHealth, SubmittedJob,
};
use crate::utils::validate_identifier;

use super::poller::StatusSource;

/// Pause between transport-level resends of a submission
const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How a non-2xx response is reported
#[derive(Debug, Clone, Copy)]
enum Failure {
    Submission,
    Api,
}

#[derive(Clone)]
pub struct PartnerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    submit_retries: u32,
    submit_retry_delay: Duration,
}

impl std::fmt::Debug for PartnerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartnerClient")
            .field("base_url", &self.base_url)
            .field("submit_retries", &self.submit_retries)
            .finish_non_exhaustive()
    }
}

impl PartnerClient {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate_client()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("callwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            submit_retries: config.submit_retries,
            submit_retry_delay: SUBMIT_RETRY_DELAY,
        })
    }

    /// Override the pause between submission resends
    pub fn with_submit_retry_delay(mut self, delay: Duration) -> Self {
        self.submit_retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header(headers::API_SECRET, &self.api_secret)
    }

    async fn parse<T: DeserializeOwned>(response: Response, failure: Failure) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = ApiErrorEnvelope::message_from_body(&body);
            return Err(match failure {
                Failure::Submission => AppError::Submission {
                    status: status.as_u16(),
                    message,
                },
                Failure::Api => AppError::Api {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// `GET /health`, checks connectivity and credentials
    pub async fn health(&self) -> Result<PartnerHealth> {
        let response = self
            .authorized(self.client.get(self.url("/health")))
            .send()
            .await?;
        Self::parse(response, Failure::Api).await
    }

    /// `POST /companies/create`
    pub async fn create_company(
        &self,
        request: &CreateCompanyRequest,
    ) -> Result<CreateCompanyResponse> {
        if request.name.trim().is_empty() || request.contact_email.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "company name and contact_email are required".to_string(),
            ));
        }

        let response = self
            .authorized(self.client.post(self.url("/companies/create")))
            .json(request)
            .send()
            .await?;
        let created: CreateCompanyResponse = Self::parse(response, Failure::Submission).await?;

        tracing::info!(company_id = %created.company_id, "Company created");
        Ok(created)
    }

    /// `POST /companies/{id}/agents/create`
    pub async fn create_agent(
        &self,
        company_id: &str,
        request: &CreateAgentRequest,
    ) -> Result<CreateAgentResponse> {
        validate_identifier("company_id", company_id)?;
        if request.email.trim().is_empty() || request.name.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "agent email and name are required".to_string(),
            ));
        }

        let path = format!(
            "/companies/{}/agents/create",
            urlencoding::encode(company_id)
        );
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .json(request)
            .send()
            .await?;
        let created: CreateAgentResponse = Self::parse(response, Failure::Submission).await?;

        tracing::info!(company_id, agent_id = %created.agent_id, "Agent created");
        Ok(created)
    }

    async fn submit_once(&self, submission: &CallSubmission) -> Result<SubmittedJob> {
        let response = self
            .authorized(self.client.post(self.url("/calls/analyze")))
            .header(headers::IDEMPOTENCY_KEY, submission.idempotency_key())
            .json(&submission.to_request())
            .send()
            .await?;
        Self::parse(response, Failure::Submission).await
    }

    /// `POST /calls/analyze`
    ///
    /// Transport failures are resent with the same idempotency key, so a
    /// request that reached the server before the connection dropped does
    /// not create a second job. Non-2xx answers are returned as
    /// [`AppError::Submission`] without a resend.
    pub async fn submit_call(&self, submission: &CallSubmission) -> Result<SubmittedJob> {
        submission.validate()?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.submit_once(submission).await {
                Ok(job) => {
                    tracing::info!(
                        job_id = %job.job_id,
                        idempotency_key = submission.idempotency_key(),
                        attempt,
                        estimated_time = ?job.estimated_time,
                        "Call submitted for analysis"
                    );
                    return Ok(job);
                }
                Err(e) if e.is_transient() && attempt <= self.submit_retries => {
                    tracing::warn!(
                        idempotency_key = submission.idempotency_key(),
                        attempt,
                        error = %e,
                        "Submission attempt failed, resending"
                    );
                    tokio::time::sleep(self.submit_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `GET /jobs/{id}/status`
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse> {
        validate_identifier("job_id", job_id)?;

        let path = format!("/jobs/{}/status", urlencoding::encode(job_id));
        let response = self
            .authorized(self.client.get(self.url(&path)))
            .send()
            .await?;
        Self::parse(response, Failure::Api).await
    }
}

#[async_trait]
impl StatusSource for PartnerClient {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusResponse> {
        self.job_status(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            api_base_url: "http://localhost:3000/api/partner/v1/".to_string(),
            api_key: "pk_test".to_string(),
            api_secret: "sk_test".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_new_requires_credentials() {
        assert!(matches!(
            PartnerClient::new(&Config::default()),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = PartnerClient::new(&config()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000/api/partner/v1");
        assert_eq!(
            client.url("/health"),
            "http://localhost:3000/api/partner/v1/health"
        );
    }

    #[tokio::test]
    async fn test_job_status_rejects_empty_id() {
        let client = PartnerClient::new(&config()).unwrap();
        assert!(matches!(
            client.job_status("").await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_validates_before_sending() {
        let client = PartnerClient::new(&config()).unwrap();
        let submission = CallSubmission::new(Vec::new(), "c1", "a1", "sales");
        assert!(matches!(
            client.submit_call(&submission).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
