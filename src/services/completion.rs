//! Finalize-once delivery of terminal job states.
//!
//! Both the poll loop and the webhook receiver report terminal states
//! here. A report is keyed on every identifier it carries (job id and
//! call id), so a webhook that only names the call still meets the poll
//! result for the same job. The first report wins and reaches the
//! consumer; later reports are dropped, with a warning when they disagree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{CompletionSource, JobCompletion, TerminalKind};

/// Outcome of recording a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// This call recorded the job as finalized
    First,
    /// An earlier call already finalized the job
    AlreadyFinalized {
        kind: TerminalKind,
        source: CompletionSource,
    },
}

/// Storage for the per-job "already finalized" markers
#[async_trait]
pub trait FinalizedStore: Send + Sync {
    /// Atomically record `kind` under every key in `keys`, unless any of
    /// them already carries a marker. Nothing is written in that case.
    async fn try_finalize(
        &self,
        keys: &[&str],
        kind: TerminalKind,
        source: CompletionSource,
    ) -> Result<Finalize>;

    /// Drop markers recorded more than `max_age` ago; returns how many went
    async fn cleanup_older_than(&self, max_age: Duration) -> Result<u64>;

    /// Short name reported by the health endpoint
    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Marker {
    kind: TerminalKind,
    source: CompletionSource,
    at: Instant,
}

/// Process-local markers; lost on restart
#[derive(Debug, Default)]
pub struct MemoryFinalizedStore {
    finalized: Mutex<HashMap<String, Marker>>,
}

impl MemoryFinalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.finalized.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.finalized.lock().await.is_empty()
    }
}

#[async_trait]
impl FinalizedStore for MemoryFinalizedStore {
    async fn try_finalize(
        &self,
        keys: &[&str],
        kind: TerminalKind,
        source: CompletionSource,
    ) -> Result<Finalize> {
        let mut finalized = self.finalized.lock().await;
        if let Some(first) = keys.iter().find_map(|key| finalized.get(*key)) {
            return Ok(Finalize::AlreadyFinalized {
                kind: first.kind,
                source: first.source,
            });
        }

        let at = Instant::now();
        for key in keys {
            finalized.insert(key.to_string(), Marker { kind, source, at });
        }
        Ok(Finalize::First)
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut finalized = self.finalized.lock().await;
        let before = finalized.len();
        finalized.retain(|_, marker| now.saturating_duration_since(marker.at) < max_age);
        Ok((before - finalized.len()) as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Receives each job's terminal state exactly once
#[async_trait]
pub trait CompletionConsumer: Send + Sync {
    async fn on_completion(&self, completion: JobCompletion);
}

/// What happened to a reported completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Duplicate,
    /// A different terminal state was already recorded and stays authoritative
    Conflict {
        first: TerminalKind,
        first_source: CompletionSource,
    },
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

pub struct CompletionDispatcher {
    store: Arc<dyn FinalizedStore>,
    consumer: Arc<dyn CompletionConsumer>,
}

impl std::fmt::Debug for CompletionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionDispatcher")
            .field("store", &self.store.backend())
            .finish()
    }
}

impl CompletionDispatcher {
    pub fn new(store: Arc<dyn FinalizedStore>, consumer: Arc<dyn CompletionConsumer>) -> Self {
        Self { store, consumer }
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Run the finalize guard only; no consumer call
    pub async fn finalize(&self, completion: &JobCompletion) -> Result<Delivery> {
        let kind = completion.state.kind();
        let keys = completion.finalize_keys();
        let outcome = self
            .store
            .try_finalize(&keys, kind, completion.source)
            .await?;

        let delivery = match outcome {
            Finalize::First => Delivery::Delivered,
            Finalize::AlreadyFinalized {
                kind: first,
                source: first_source,
            } if first == kind => {
                tracing::debug!(
                    job_id = %completion.job_id,
                    source = %completion.source,
                    first_source = %first_source,
                    "Duplicate terminal notification ignored"
                );
                Delivery::Duplicate
            }
            Finalize::AlreadyFinalized {
                kind: first,
                source: first_source,
            } => {
                tracing::warn!(
                    job_id = %completion.job_id,
                    first = %first,
                    first_source = %first_source,
                    second = %kind,
                    second_source = %completion.source,
                    "Conflicting terminal state ignored, first observation stays authoritative"
                );
                Delivery::Conflict {
                    first,
                    first_source,
                }
            }
        };

        Ok(delivery)
    }

    /// Guard, then run the consumer before returning
    pub async fn deliver(&self, completion: JobCompletion) -> Result<Delivery> {
        let delivery = self.finalize(&completion).await?;
        if delivery.is_delivered() {
            tracing::info!(
                job_id = %completion.job_id,
                state = %completion.state.kind(),
                source = %completion.source,
                "Job finalized"
            );
            self.consumer.on_completion(completion).await;
        }
        Ok(delivery)
    }

    /// Guard inline, then hand the consumer call to a background task
    pub async fn dispatch(&self, completion: JobCompletion) -> Result<Delivery> {
        let delivery = self.finalize(&completion).await?;
        if delivery.is_delivered() {
            tracing::info!(
                job_id = %completion.job_id,
                state = %completion.state.kind(),
                source = %completion.source,
                "Job finalized"
            );
            let consumer = self.consumer.clone();
            tokio::spawn(async move {
                consumer.on_completion(completion).await;
            });
        }
        Ok(delivery)
    }
}

/// Consumer that only logs; used when nothing else is wired in
#[derive(Debug, Default)]
pub struct LoggingConsumer;

#[async_trait]
impl CompletionConsumer for LoggingConsumer {
    async fn on_completion(&self, completion: JobCompletion) {
        match completion.state.into_result() {
            Ok(result) => tracing::info!(
                job_id = %completion.job_id,
                call_id = ?result.call_id,
                overall_score = ?result.score("overall_score"),
                source = %completion.source,
                "Analysis completed"
            ),
            Err(e) => tracing::warn!(
                job_id = %completion.job_id,
                source = %completion.source,
                error = %e,
                "Analysis failed"
            ),
        }
    }
}

/// Cancels a job's poll loop once the job is finalized by the webhook,
/// then hands the completion to the inner consumer
pub struct WatchingConsumer {
    inner: Arc<dyn CompletionConsumer>,
    watched: Mutex<HashMap<String, CancellationToken>>,
}

impl WatchingConsumer {
    pub fn new(inner: Arc<dyn CompletionConsumer>) -> Self {
        Self {
            inner,
            watched: Mutex::new(HashMap::new()),
        }
    }

    /// Register the token of the poll loop running for `job_id`
    pub async fn watch(&self, job_id: &str, cancel: CancellationToken) {
        self.watched.lock().await.insert(job_id.to_string(), cancel);
    }

    pub async fn unwatch(&self, job_id: &str) {
        self.watched.lock().await.remove(job_id);
    }

    pub async fn watched_count(&self) -> usize {
        self.watched.lock().await.len()
    }
}

#[async_trait]
impl CompletionConsumer for WatchingConsumer {
    async fn on_completion(&self, completion: JobCompletion) {
        let tokens: Vec<CancellationToken> = {
            let mut watched = self.watched.lock().await;
            completion
                .finalize_keys()
                .into_iter()
                .filter_map(|key| watched.remove(key))
                .collect()
        };
        if completion.source == CompletionSource::Webhook {
            for cancel in tokens {
                tracing::debug!(job_id = %completion.job_id, "Stopping poll loop, webhook arrived first");
                cancel.cancel();
            }
        }
        self.inner.on_completion(completion).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Collects every completion it receives
    #[derive(Default)]
    pub struct RecordingConsumer {
        pub seen: Mutex<Vec<JobCompletion>>,
    }

    #[async_trait]
    impl CompletionConsumer for RecordingConsumer {
        async fn on_completion(&self, completion: JobCompletion) {
            self.seen.lock().await.push(completion);
        }
    }
}
