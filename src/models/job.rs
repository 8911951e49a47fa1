use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Any value the server sends that this client does not know
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Body of `GET /jobs/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: u8,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_details: Option<serde_json::Value>,
}

/// Progress observed while a job is still running
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub attempt: u32,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(job_id: &str, status: JobStatus, progress: u8, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress: progress.min(100),
            attempt,
            timestamp: Utc::now(),
        }
    }
}

/// Result of a completed analysis job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub call_id: Option<String>,
    /// Analysis payload as sent by the server (opaque to this crate)
    pub results: serde_json::Value,
}

impl JobResult {
    /// Top-level numeric field of the payload, e.g. `overall_score`
    pub fn score(&self, field: &str) -> Option<f64> {
        self.results.get(field).and_then(|v| v.as_f64())
    }
}

/// Discriminant of a terminal state, stored by the finalized-job guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    Completed,
    Failed,
}

impl TerminalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalKind::Completed => "completed",
            TerminalKind::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TerminalKind::Completed),
            "failed" => Some(TerminalKind::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalState {
    Completed(JobResult),
    Failed {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl TerminalState {
    pub fn kind(&self) -> TerminalKind {
        match self {
            TerminalState::Completed(_) => TerminalKind::Completed,
            TerminalState::Failed { .. } => TerminalKind::Failed,
        }
    }

    /// `Completed` as `Ok`, `Failed` as [`AppError::JobFailed`] with the server message
    pub fn into_result(self) -> Result<JobResult, AppError> {
        match self {
            TerminalState::Completed(result) => Ok(result),
            TerminalState::Failed { message, .. } => Err(AppError::JobFailed(message)),
        }
    }
}

/// Which delivery path observed the terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionSource {
    Poll,
    Webhook,
}

impl CompletionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionSource::Poll => "poll",
            CompletionSource::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poll" => Some(CompletionSource::Poll),
            "webhook" => Some(CompletionSource::Webhook),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompletionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress as a whole percent; `null`, negative, fractional or non-numeric
/// values never fail the status fetch
fn lenient_progress<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let percent = value
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .filter(|p| p.is_finite())
        .unwrap_or(0.0);
    Ok(percent.clamp(0.0, 100.0).round() as u8)
}

/// "Job X reached terminal state Y", as handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub job_id: String,
    /// Call the job analysed, when known; a second finalize key for the job
    pub call_id: Option<String>,
    pub state: TerminalState,
    pub source: CompletionSource,
    pub observed_at: DateTime<Utc>,
}

impl JobCompletion {
    pub fn new(job_id: impl Into<String>, state: TerminalState, source: CompletionSource) -> Self {
        let call_id = match &state {
            TerminalState::Completed(result) => result.call_id.clone(),
            TerminalState::Failed { .. } => None,
        };
        Self {
            job_id: job_id.into(),
            call_id,
            state,
            source,
            observed_at: Utc::now(),
        }
    }

    pub fn with_call_id(mut self, call_id: Option<String>) -> Self {
        if let Some(id) = call_id.filter(|id| !id.trim().is_empty()) {
            self.call_id = Some(id);
        }
        self
    }

    /// Identifiers the finalize guard marks for this job, sorted and deduplicated.
    ///
    /// The poller knows the job id and learns the call id with the result;
    /// a webhook may carry only the call id. Marking both lets either path
    /// recognise the other's report.
    pub fn finalize_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.job_id.as_str()];
        if let Some(call_id) = self.call_id.as_deref().filter(|id| !id.trim().is_empty()) {
            keys.push(call_id);
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}
