// Moderation pipeline - the orchestrator that drives each submission's
// lifecycle.
//
// Per submission: CHECK_CACHE -> CHECK_DUPLICATE -> DISPATCH -> AGGREGATE ->
// STORE, where the first two stages can short-circuit straight to done. Every
// collaborator is injected at construction; the pipeline owns the metrics and
// the shutdown lifecycle of its background tasks.

use super::pipeline_models::{ModerationOutcome, PipelineConfig, PipelineError};
use crate::core::aggregate::Aggregator;
use crate::core::breaker::{CallPath, CircuitBreaker};
use crate::core::cache::{ResultCache, VerdictStore};
use crate::core::content::{ContentSubmission, ModerationVerdict};
use crate::core::dispatch::{Priority, VendorDispatcher};
use crate::core::duplicates::DuplicateIndex;
use crate::core::events::{EventBus, ModerationEvent};
use crate::core::fallback::FallbackClassifier;
use crate::core::hashing::{HashingEngine, SubmissionFingerprints};
use crate::core::metrics::{MetricsSnapshot, PerformanceMetrics};
use crate::core::vendors::{BatchItem, VendorError, VendorOutcome};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Orchestrates the moderation optimization pipeline.
pub struct ModerationPipeline<S: VerdictStore> {
    config: PipelineConfig,
    hashing: HashingEngine,
    cache: ResultCache<S>,
    index: DuplicateIndex,
    dispatcher: Arc<VendorDispatcher>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    aggregator: Aggregator,
    fallback: Arc<FallbackClassifier>,
    events: EventBus,
    metrics: Arc<PerformanceMetrics>,
    shutdown: watch::Sender<bool>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: VerdictStore + 'static> ModerationPipeline<S> {
    /// Wire the pipeline together and start its background metrics consumer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        hashing: HashingEngine,
        cache: ResultCache<S>,
        index: DuplicateIndex,
        dispatcher: Arc<VendorDispatcher>,
        breakers: Vec<Arc<CircuitBreaker>>,
        aggregator: Aggregator,
        fallback: Arc<FallbackClassifier>,
        events: EventBus,
    ) -> Arc<Self> {
        let metrics = Arc::new(PerformanceMetrics::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let metrics_task = metrics.spawn_consumer(&events, shutdown_rx);

        let breakers = breakers
            .into_iter()
            .map(|b| (b.vendor().to_string(), b))
            .collect();

        Arc::new(Self {
            config,
            hashing,
            cache,
            index,
            dispatcher,
            breakers,
            aggregator,
            fallback,
            events,
            metrics,
            shutdown,
            metrics_task: Mutex::new(Some(metrics_task)),
        })
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Process one submission end to end.
    pub async fn process(
        &self,
        submission: ContentSubmission,
    ) -> Result<ModerationOutcome, PipelineError> {
        let started = Instant::now();

        // CHECK_CACHE: a live verdict for this exact id short-circuits
        // everything.
        if let Some(verdict) = self.cache.get(&submission.id).await {
            tracing::debug!(content_id = %submission.id, "Cache hit");
            self.metrics.record_cache_hit();
            self.metrics.record_request(started.elapsed());
            return Ok(ModerationOutcome::cached(verdict));
        }

        // CHECK_DUPLICATE: a fingerprint failure is "no duplicate", never a
        // pipeline failure.
        let prints = match self.hashing.fingerprint(&submission) {
            Ok(prints) => Some(prints),
            Err(err) => {
                tracing::warn!(
                    content_id = %submission.id,
                    "Fingerprinting failed, treating as no duplicate: {err}"
                );
                None
            }
        };

        if let Some(prints) = &prints {
            // Byte-identical content short-circuits on the exact digest
            // before the similarity scan runs.
            let mut hit = match &prints.exact {
                Some(exact) => self.index.find_exact(exact).await,
                None => None,
            };
            if hit.is_none() {
                hit = self
                    .index
                    .find_duplicate(&prints.indexable, self.config.duplicate_threshold)
                    .await;
            }
            if let Some(hit) = hit {
                // Reuse the original's verdict - but only if it is still
                // live. An expired or evicted original means we re-classify.
                if let Some(verdict) = self.cache.get(&hit.original_id).await {
                    tracing::debug!(
                        content_id = %submission.id,
                        original_id = %hit.original_id,
                        similarity = hit.similarity,
                        "Near-duplicate hit"
                    );
                    self.metrics.record_duplicate();
                    self.metrics.record_request(started.elapsed());
                    return Ok(ModerationOutcome::duplicate(verdict));
                }
            }
        }

        // DISPATCH + AGGREGATE
        let (outcomes, used_fallback) = match self.dispatch(&submission).await {
            Ok(result) => result,
            Err(err) => {
                self.metrics.record_request(started.elapsed());
                self.events.publish(ModerationEvent::ProcessingError {
                    content_id: submission.id.clone(),
                    cause: err.to_string(),
                });
                return Err(err);
            }
        };
        let aggregated = self.aggregator.aggregate(&outcomes);

        // STORE
        let verdict = ModerationVerdict {
            content_id: submission.id.clone(),
            decision: aggregated.decision,
            confidence: aggregated.confidence,
            categories: aggregated.categories,
            vendor_scores: aggregated.vendor_scores,
            created_at: Utc::now(),
            ttl: if used_fallback {
                self.config.fallback_ttl
            } else {
                self.config.verdict_ttl
            },
        };
        self.store(&verdict, prints).await;

        self.metrics.record_request(started.elapsed());
        tracing::info!(
            content_id = %submission.id,
            decision = %verdict.decision,
            confidence = verdict.confidence,
            used_fallback,
            "Submission moderated"
        );
        Ok(ModerationOutcome::fresh(verdict))
    }

    /// Process a list with a bounded concurrency window. One item's failure
    /// never aborts its siblings; results come back in input order.
    pub async fn batch_process(
        self: &Arc<Self>,
        submissions: Vec<ContentSubmission>,
    ) -> Vec<Result<ModerationOutcome, PipelineError>> {
        let chunk_size = self.config.batch_chunk_size.max(1);
        let mut results: Vec<Option<Result<ModerationOutcome, PipelineError>>> = Vec::new();
        results.resize_with(submissions.len(), || None);

        let mut position = 0;
        let mut remaining = submissions.into_iter();
        loop {
            let chunk: Vec<ContentSubmission> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len();

            let mut set = JoinSet::new();
            for (offset, submission) in chunk.into_iter().enumerate() {
                let pipeline = Arc::clone(self);
                let index = position + offset;
                set.spawn(async move { (index, pipeline.process(submission).await) });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = Some(result),
                    Err(err) => {
                        tracing::error!("Batch worker panicked: {err}");
                    }
                }
            }
            position += chunk_len;
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(PipelineError::Processing {
                        content_id: "unknown".to_string(),
                        cause: "batch worker aborted".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Stop background work: no more batch flushes, no more metrics folding.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = {
            let mut guard = self
                .metrics_task
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        self.dispatcher.shutdown().await;
    }

    /// Fan the submission out to every configured vendor concurrently, each
    /// call gated by that vendor group's circuit breaker with the local
    /// classifier as the fallback.
    async fn dispatch(
        &self,
        submission: &ContentSubmission,
    ) -> Result<(Vec<VendorOutcome>, bool), PipelineError> {
        let mut set = JoinSet::new();
        for (vendor, breaker) in &self.breakers {
            let vendor = vendor.clone();
            let breaker = Arc::clone(breaker);
            let dispatcher = Arc::clone(&self.dispatcher);
            let fallback = Arc::clone(&self.fallback);
            let submission = submission.clone();
            let wait = self.config.vendor_timeout;

            set.spawn(async move {
                let item = BatchItem {
                    content_id: submission.id.clone(),
                    kind: submission.kind,
                    payload: submission.payload.clone(),
                };
                let operation = async {
                    match tokio::time::timeout(wait, dispatcher.submit(&vendor, item, Priority::Normal))
                        .await
                    {
                        Ok(result) => result,
                        // The caller-side wait expired; the batch completes
                        // without us.
                        Err(_) => Err(VendorError::Timeout),
                    }
                };
                let local = async { fallback.classify(&submission) };

                let result = breaker.execute(operation, local).await;
                (vendor, result)
            });
        }

        let mut outcomes = Vec::new();
        let mut used_fallback = false;
        while let Some(joined) = set.join_next().await {
            let (vendor, result) = joined.map_err(|err| PipelineError::Processing {
                content_id: submission.id.clone(),
                cause: format!("dispatch task failed: {err}"),
            })?;
            match result {
                Ok(gated) => {
                    if gated.path == CallPath::Fallback {
                        used_fallback = true;
                    }
                    outcomes.push(VendorOutcome {
                        vendor,
                        score: gated.value,
                    });
                }
                Err(err) => {
                    return Err(PipelineError::Processing {
                        content_id: submission.id.clone(),
                        cause: format!("{vendor}: {err}"),
                    });
                }
            }
        }
        Ok((outcomes, used_fallback))
    }

    /// Write-back stage: cache the verdict and index the fingerprint.
    async fn store(&self, verdict: &ModerationVerdict, prints: Option<SubmissionFingerprints>) {
        self.cache.put(verdict.clone()).await;
        if let Some(prints) = prints {
            if let Some(exact) = &prints.exact {
                self.index.insert_exact(exact).await;
            }
            self.index.insert(prints.indexable).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
