//! Verification and decoding of incoming webhook deliveries

use axum::http::StatusCode;

use crate::error::AppError;
use crate::models::{
    CompletionSource, JobCompletion, JobResult, JobStatus, TerminalState, WebhookAck,
    WebhookEvent,
};
use crate::utils::canonicalize_bytes;

use super::signature::WebhookSigner;

/// What to do with one delivery
#[derive(Debug)]
pub enum WebhookOutcome {
    /// Verified terminal state, ready for the finalize guard
    Deliver(JobCompletion),
    /// Authentic but nothing to act on; acknowledged so the issuer stops retrying
    Ignored {
        reason: &'static str,
        job_id: Option<String>,
    },
    Rejected(AppError),
}

impl WebhookOutcome {
    /// Status the webhook route answers with, before the finalize guard runs
    pub fn http_status(&self) -> StatusCode {
        match self {
            WebhookOutcome::Deliver(_) | WebhookOutcome::Ignored { .. } => StatusCode::OK,
            WebhookOutcome::Rejected(e) => e.status_code(),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            WebhookOutcome::Deliver(completion) => Some(&completion.job_id),
            WebhookOutcome::Ignored { job_id, .. } => job_id.as_deref(),
            WebhookOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookReceiver {
    signer: WebhookSigner,
}

impl WebhookReceiver {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            signer: WebhookSigner::new(secret),
        }
    }

    /// Check one delivery.
    ///
    /// Order: the body must parse as JSON (else 400), the signature must
    /// match the canonical form of that JSON (else 401), then the event is
    /// decoded. No side effects; the caller runs the finalize guard.
    pub fn handle_incoming(&self, raw_body: &[u8], signature: Option<&str>) -> WebhookOutcome {
        let (value, canonical) = match canonicalize_bytes(raw_body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw_body.len(), "Webhook body is not JSON");
                return WebhookOutcome::Rejected(AppError::MalformedEvent(
                    "body is not valid JSON".to_string(),
                ));
            }
        };

        let signature = match signature {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                tracing::warn!("Webhook delivery without signature rejected");
                return WebhookOutcome::Rejected(AppError::SignatureVerification);
            }
        };

        if !self.signer.verify(&canonical, signature) {
            tracing::warn!("Webhook signature mismatch");
            return WebhookOutcome::Rejected(AppError::SignatureVerification);
        }

        let event: WebhookEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Signed webhook event has an unexpected shape");
                return WebhookOutcome::Ignored {
                    reason: "unrecognized event",
                    job_id: None,
                };
            }
        };

        let Some(job_id) = event.job_key().map(str::to_string) else {
            tracing::warn!("Signed webhook event without job id");
            return WebhookOutcome::Ignored {
                reason: "missing job id",
                job_id: None,
            };
        };

        let call_id = event.call_id.clone();
        let state = match event.status {
            JobStatus::Completed => TerminalState::Completed(JobResult {
                job_id: job_id.clone(),
                call_id: event.call_id,
                results: event.results.unwrap_or(serde_json::Value::Null),
            }),
            JobStatus::Failed => TerminalState::Failed {
                message: event
                    .error_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "job failed without an error message".to_string()),
                details: event.error_details,
            },
            other => {
                tracing::info!(job_id = %job_id, status = %other, "Non-terminal webhook ignored");
                return WebhookOutcome::Ignored {
                    reason: "non-terminal status",
                    job_id: Some(job_id),
                };
            }
        };

        WebhookOutcome::Deliver(
            JobCompletion::new(job_id, state, CompletionSource::Webhook).with_call_id(call_id),
        )
    }
}

/// Ack body for an outcome that the route answers itself
pub fn ack_for(outcome: &WebhookOutcome) -> WebhookAck {
    let status = match outcome {
        WebhookOutcome::Deliver(_) => "accepted",
        WebhookOutcome::Ignored { .. } => "ignored",
        WebhookOutcome::Rejected(_) => "rejected",
    };
    WebhookAck::new(status, outcome.job_id().map(str::to_string))
}
