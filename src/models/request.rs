use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::utils::validation::{validate_identifier, validate_webhook_url};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    pub contact_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questionnaire_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCompanyResponse {
    pub company_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Agent role inside a company
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    #[default]
    Agent,
    Manager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: AgentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentResponse {
    pub agent_id: String,
    #[serde(default)]
    pub temporary_password: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Full,
    ToneOnly,
}

/// One logical call submission.
///
/// The idempotency key is fixed when the submission is built, so every
/// resend of the same value reuses it and the server never creates a
/// second job for it.
#[derive(Debug, Clone)]
pub struct CallSubmission {
    pub audio: Vec<u8>,
    pub company_id: String,
    pub agent_id: String,
    pub call_type: String,
    pub analysis_type: AnalysisType,
    pub webhook_url: Option<String>,
    pub metadata: serde_json::Value,
    idempotency_key: String,
}

impl CallSubmission {
    pub fn new(
        audio: Vec<u8>,
        company_id: impl Into<String>,
        agent_id: impl Into<String>,
        call_type: impl Into<String>,
    ) -> Self {
        Self {
            audio,
            company_id: company_id.into(),
            agent_id: agent_id.into(),
            call_type: call_type.into(),
            analysis_type: AnalysisType::default(),
            webhook_url: None,
            metadata: serde_json::json!({}),
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the generated key, e.g. when resuming a submission after a restart
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.is_empty() {
            return Err(AppError::InvalidInput("audio payload is empty".to_string()));
        }
        validate_identifier("company_id", &self.company_id)?;
        validate_identifier("agent_id", &self.agent_id)?;
        validate_identifier("call_type", &self.call_type)?;
        validate_identifier("idempotency key", &self.idempotency_key)?;
        if let Some(url) = &self.webhook_url {
            validate_webhook_url(url)?;
        }
        Ok(())
    }

    /// Wire body for `POST /calls/analyze`
    pub fn to_request(&self) -> AnalyzeCallRequest {
        AnalyzeCallRequest {
            audio_file: STANDARD.encode(&self.audio),
            company_id: self.company_id.clone(),
            agent_id: self.agent_id.clone(),
            call_type: self.call_type.clone(),
            analysis_type: self.analysis_type,
            webhook_url: self.webhook_url.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeCallRequest {
    /// Base64 encoded audio
    pub audio_file: String,
    pub company_id: String,
    pub agent_id: String,
    pub call_type: String,
    pub analysis_type: AnalysisType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Response of `POST /calls/analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_stable_across_clones() {
        let submission = CallSubmission::new(vec![1, 2, 3], "company", "agent", "sales");
        let resend = submission.clone();
        assert_eq!(submission.idempotency_key(), resend.idempotency_key());

        let other = CallSubmission::new(vec![1, 2, 3], "company", "agent", "sales");
        assert_ne!(submission.idempotency_key(), other.idempotency_key());
    }

    #[test]
    fn test_to_request_encodes_audio() {
        let submission = CallSubmission::new(b"RIFF".to_vec(), "c1", "a1", "support")
            .with_analysis_type(AnalysisType::ToneOnly);
        let request = submission.to_request();
        assert_eq!(request.audio_file, "UklGRg==");

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["analysis_type"], "tone_only");
        assert!(body.get("webhook_url").is_none());
    }

    #[test]
    fn test_validate_rejects_empty_audio_and_bad_url() {
        let empty = CallSubmission::new(Vec::new(), "c1", "a1", "sales");
        assert!(empty.validate().is_err());

        let bad_url = CallSubmission::new(vec![0], "c1", "a1", "sales")
            .with_webhook_url("ftp://example.com/hook");
        assert!(bad_url.validate().is_err());

        let ok = CallSubmission::new(vec![0], "c1", "a1", "sales")
            .with_webhook_url("https://partner.example.com/hook");
        assert!(ok.validate().is_ok());
    }
}
