//! Status polling until a job reaches a terminal state

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    CompletionSource, JobCompletion, JobResult, JobStatus, JobStatusResponse, ProgressUpdate,
    TerminalState,
};
use crate::utils::{validate_identifier, validate_poll_settings};

/// Message used when the server reports `failed` without one
const UNKNOWN_FAILURE: &str = "job failed without an error message";

/// Anything that can report a job's current status
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatusResponse>;
}

/// Sender for progress observed while polling
pub type ProgressSender = broadcast::Sender<ProgressUpdate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(3),
        }
    }
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            interval: config.poll_interval(),
        }
    }
}

/// How a poll run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(JobResult),
    Failed {
        message: String,
        details: Option<serde_json::Value>,
    },
    TimedOut {
        attempts: u32,
    },
    Cancelled,
}

impl PollOutcome {
    pub fn into_result(self) -> Result<JobResult> {
        match self {
            PollOutcome::Completed(result) => Ok(result),
            PollOutcome::Failed { message, .. } => Err(AppError::JobFailed(message)),
            PollOutcome::TimedOut { attempts } => Err(AppError::PollTimeout { attempts }),
            PollOutcome::Cancelled => Err(AppError::Cancelled),
        }
    }

    /// Terminal outcomes as a completion for the dispatcher; `None` otherwise
    pub fn into_completion(self, job_id: &str) -> Option<JobCompletion> {
        let state = match self {
            PollOutcome::Completed(result) => TerminalState::Completed(result),
            PollOutcome::Failed { message, details } => TerminalState::Failed { message, details },
            PollOutcome::TimedOut { .. } | PollOutcome::Cancelled => return None,
        };
        Some(JobCompletion::new(job_id, state, CompletionSource::Poll))
    }
}

pub struct Poller<S> {
    source: S,
    progress_tx: Option<ProgressSender>,
}

impl<S: StatusSource> Poller<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            progress_tx: None,
        }
    }

    /// Broadcast a [`ProgressUpdate`] for every non-terminal fetch
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the job status up to `settings.max_attempts` times.
    ///
    /// Returns on the first terminal status without fetching again. The
    /// cancel token is checked before every fetch and while sleeping, never
    /// during a fetch. No sleep follows the last attempt.
    pub async fn await_completion(
        &self,
        job_id: &str,
        settings: PollSettings,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        validate_identifier("job_id", job_id)?;
        validate_poll_settings(settings.max_attempts, settings.interval)?;

        let mut progress = 0u8;

        for attempt in 1..=settings.max_attempts {
            if cancel.is_cancelled() {
                tracing::info!(job_id, attempt, "Polling cancelled");
                return Ok(PollOutcome::Cancelled);
            }

            let status = self.source.fetch_status(job_id).await?;

            match status.status {
                JobStatus::Completed => {
                    tracing::info!(job_id, attempt, "Job completed");
                    return Ok(PollOutcome::Completed(JobResult {
                        job_id: status.job_id.unwrap_or_else(|| job_id.to_string()),
                        call_id: status.call_id,
                        results: status.results.unwrap_or(serde_json::Value::Null),
                    }));
                }
                JobStatus::Failed => {
                    let message = status
                        .error_message
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| UNKNOWN_FAILURE.to_string());
                    tracing::warn!(job_id, attempt, error = %message, "Job failed");
                    return Ok(PollOutcome::Failed {
                        message,
                        details: status.error_details,
                    });
                }
                other => {
                    if other == JobStatus::Unknown {
                        tracing::warn!(job_id, attempt, "Unrecognized job status, still waiting");
                    }
                    // Progress never moves backwards while the job runs
                    progress = progress.max(status.progress.min(100));
                    tracing::debug!(
                        job_id,
                        attempt,
                        max_attempts = settings.max_attempts,
                        status = %other,
                        progress,
                        "Job still running"
                    );
                    if let Some(tx) = &self.progress_tx {
                        let _ = tx.send(ProgressUpdate::new(job_id, other, progress, attempt));
                    }
                }
            }

            if attempt < settings.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(job_id, attempt, "Polling cancelled");
                        return Ok(PollOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(settings.interval) => {}
                }
            }
        }

        tracing::warn!(
            job_id,
            attempts = settings.max_attempts,
            "Job did not finish within the poll budget"
        );
        Ok(PollOutcome::TimedOut {
            attempts: settings.max_attempts,
        })
    }
}
