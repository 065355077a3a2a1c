// Performance metrics - monotonically accumulating pipeline counters.
//
// Counters live for the orchestrator's lifetime and reset only on explicit
// operator request. Vendor call volume and cost arrive via BatchProcessed
// events, folded in by a background consumer that stops on shutdown.

use crate::core::events::{EventBus, ModerationEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub duplicates_detected: u64,
    pub total_processing_ms: u64,
    pub vendor_calls: u64,
    pub total_cost: f64,
}

/// Shared pipeline counters. All methods are lock-free.
#[derive(Default)]
pub struct PerformanceMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    duplicates_detected: AtomicU64,
    total_processing_ms: AtomicU64,
    vendor_calls: AtomicU64,
    /// Cost accumulates in millionths so it can live in an atomic.
    cost_micro: AtomicU64,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed submission, whatever path it exited through.
    pub fn record_request(&self, elapsed: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_processing_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one event into the counters. Only batch flushes carry numbers.
    pub fn apply_event(&self, event: &ModerationEvent) {
        if let ModerationEvent::BatchProcessed { cost, .. } = event {
            self.vendor_calls.fetch_add(1, Ordering::Relaxed);
            self.cost_micro
                .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            total_processing_ms: self.total_processing_ms.load(Ordering::Relaxed),
            vendor_calls: self.vendor_calls.load(Ordering::Relaxed),
            total_cost: self.cost_micro.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }

    /// Zero every counter. Operator-initiated only.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.duplicates_detected.store(0, Ordering::Relaxed);
        self.total_processing_ms.store(0, Ordering::Relaxed);
        self.vendor_calls.store(0, Ordering::Relaxed);
        self.cost_micro.store(0, Ordering::Relaxed);
    }

    /// Spawn the event consumer. It folds batch events into the counters
    /// until the shutdown signal flips or the bus closes.
    pub fn spawn_consumer(
        self: &Arc<Self>,
        events: &EventBus,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let metrics = Arc::clone(self);
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = rx.recv() => {
                        match event {
                            Ok(event) => metrics.apply_event(&event),
                            // Dropped events under load are acceptable;
                            // metrics are best-effort.
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::debug!(skipped, "Metrics consumer lagged behind event bus");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let metrics = PerformanceMetrics::new();
        metrics.record_request(Duration::from_millis(12));
        metrics.record_request(Duration::from_millis(8));
        metrics.record_cache_hit();
        metrics.record_duplicate();

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.duplicates_detected, 1);
        assert_eq!(snap.total_processing_ms, 20);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot {
            total_requests: 0,
            cache_hits: 0,
            duplicates_detected: 0,
            total_processing_ms: 0,
            vendor_calls: 0,
            total_cost: 0.0,
        });
    }

    #[test]
    fn batch_events_fold_into_cost_and_call_count() {
        let metrics = PerformanceMetrics::new();
        metrics.apply_event(&ModerationEvent::BatchProcessed {
            vendor: "openai".to_string(),
            request_count: 5,
            cost: 0.01,
        });
        metrics.apply_event(&ModerationEvent::BatchProcessed {
            vendor: "perspective".to_string(),
            request_count: 3,
            cost: 0.006,
        });
        // Non-batch events carry no counters.
        metrics.apply_event(&ModerationEvent::CircuitOpened {
            vendor: "openai".to_string(),
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.vendor_calls, 2);
        assert!((snap.total_cost - 0.016).abs() < 1e-9);
    }

    #[tokio::test]
    async fn consumer_stops_on_shutdown() {
        let metrics = Arc::new(PerformanceMetrics::new());
        let events = EventBus::new(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = metrics.spawn_consumer(&events, shutdown_rx);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Events published after shutdown are no longer folded in.
        events.publish(ModerationEvent::BatchProcessed {
            vendor: "openai".to_string(),
            request_count: 1,
            cost: 0.002,
        });
        assert_eq!(metrics.snapshot().vendor_calls, 0);
    }

    #[tokio::test]
    async fn consumer_folds_published_events() {
        let metrics = Arc::new(PerformanceMetrics::new());
        let events = EventBus::new(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _handle = metrics.spawn_consumer(&events, shutdown_rx);

        events.publish(ModerationEvent::BatchProcessed {
            vendor: "openai".to_string(),
            request_count: 2,
            cost: 0.004,
        });

        // Give the consumer task a chance to run.
        for _ in 0..10 {
            if metrics.snapshot().vendor_calls == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(metrics.snapshot().vendor_calls, 1);
    }
}
