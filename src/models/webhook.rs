use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::JobStatus;

/// Push notification sent by the partner API when a job finishes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookEvent {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub error_details: Option<serde_json::Value>,
}

impl WebhookEvent {
    /// Job identifier; older issuers only send `call_id`
    pub fn job_key(&self) -> Option<&str> {
        let present = |id: &&str| !id.trim().is_empty();
        self.job_id
            .as_deref()
            .filter(present)
            .or_else(|| self.call_id.as_deref().filter(present))
    }
}

/// Body returned to the webhook issuer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebhookAck {
    /// `accepted`, `duplicate`, `ignored` or `rejected`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl WebhookAck {
    pub fn new(status: &str, job_id: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_falls_back_to_call_id() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"status":"completed","call_id":"call-9"}"#).unwrap();
        assert_eq!(event.job_key(), Some("call-9"));

        let event: WebhookEvent = serde_json::from_str(
            r#"{"status":"completed","job_id":"job-1","call_id":"call-9"}"#,
        )
        .unwrap();
        assert_eq!(event.job_key(), Some("job-1"));
    }

    #[test]
    fn test_blank_job_key_is_none() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"status":"failed","job_id":"  "}"#).unwrap();
        assert_eq!(event.job_key(), None);
    }
}
