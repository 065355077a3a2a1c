// Vendor dispatcher - batches concurrent classification requests per vendor.
//
// One background worker per configured vendor collects pending requests and
// flushes them as a single vendor call when the batch reaches its size cap or
// the per-vendor flush interval elapses, whichever comes first. The single
// vendor response set is demultiplexed back to each waiting caller through
// its oneshot handle.
//
// A caller may stop waiting (drop its receiver) without cancelling the batch;
// the flush completes normally for everyone else.

use crate::core::events::{EventBus, ModerationEvent};
use crate::core::vendors::{BatchItem, VendorClient, VendorError, VendorScore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub name: String,
    /// A batch flushes as soon as it holds this many requests.
    pub max_batch_size: usize,
    /// A non-full batch flushes when this much time has passed since its
    /// first request was enqueued.
    pub flush_interval: Duration,
    /// Estimated cost per classified item, folded into batch events.
    pub cost_per_request: f64,
}

/// Where a request sorts within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

// ============================================================================
// DISPATCHER
// ============================================================================

struct PendingRequest {
    item: BatchItem,
    priority: Priority,
    respond_to: oneshot::Sender<Result<VendorScore, VendorError>>,
}

/// Batches and dispatches content to vendors, one worker task per vendor.
pub struct VendorDispatcher {
    queues: HashMap<String, mpsc::Sender<PendingRequest>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl VendorDispatcher {
    /// Spawn one batching worker per vendor.
    pub fn new(vendors: Vec<(VendorConfig, Arc<dyn VendorClient>)>, events: EventBus) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut queues = HashMap::new();
        let mut workers = Vec::new();

        for (config, client) in vendors {
            let (tx, rx) = mpsc::channel(1024);
            queues.insert(config.name.clone(), tx);
            workers.push(tokio::spawn(run_worker(
                config,
                client,
                rx,
                shutdown.subscribe(),
                events.clone(),
            )));
        }

        Self {
            queues,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    pub fn vendor_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    /// Enqueue one item for a vendor and wait for its score.
    ///
    /// Suspends until the enclosing batch flushes by size or by timer.
    pub async fn submit(
        &self,
        vendor: &str,
        item: BatchItem,
        priority: Priority,
    ) -> Result<VendorScore, VendorError> {
        let queue = self
            .queues
            .get(vendor)
            .ok_or_else(|| VendorError::Unavailable(format!("unknown vendor {vendor}")))?;

        let (respond_to, response) = oneshot::channel();
        queue
            .send(PendingRequest {
                item,
                priority,
                respond_to,
            })
            .await
            .map_err(|_| VendorError::DispatcherClosed)?;

        response.await.map_err(|_| VendorError::DispatcherClosed)?
    }

    /// Stop all workers. No batch flushes happen after this; requests still
    /// pending fail with `DispatcherClosed`.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn run_worker(
    config: VendorConfig,
    client: Arc<dyn VendorClient>,
    mut requests: mpsc::Receiver<PendingRequest>,
    mut shutdown: watch::Receiver<bool>,
    events: EventBus,
) {
    let mut pending: Vec<PendingRequest> = Vec::new();
    // Set when the first request of a batch arrives.
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            request = requests.recv() => {
                match request {
                    Some(request) => {
                        if pending.is_empty() {
                            deadline = Some(Instant::now() + config.flush_interval);
                        }
                        pending.push(request);
                        if pending.len() >= config.max_batch_size {
                            flush(&config, client.as_ref(), &mut pending, &events).await;
                            deadline = None;
                        }
                    }
                    None => break,
                }
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                flush(&config, client.as_ref(), &mut pending, &events).await;
                deadline = None;
            }
        }
    }

    // Flushing is terminal and stops at shutdown: whatever is still pending
    // fails rather than triggering one more vendor call.
    for request in pending.drain(..) {
        let _ = request.respond_to.send(Err(VendorError::DispatcherClosed));
    }
}

/// Send everything pending as one vendor call and demultiplex the response.
async fn flush(
    config: &VendorConfig,
    client: &dyn VendorClient,
    pending: &mut Vec<PendingRequest>,
    events: &EventBus,
) {
    if pending.is_empty() {
        return;
    }

    let mut batch = std::mem::take(pending);
    // Stable sort: high priority first, enqueue order within each class.
    batch.sort_by_key(|r| match r.priority {
        Priority::High => 0,
        Priority::Normal => 1,
    });

    let items: Vec<BatchItem> = batch.iter().map(|r| r.item.clone()).collect();
    let request_count = items.len();
    tracing::debug!(vendor = %config.name, request_count, "Flushing vendor batch");

    match client.classify_batch(&items).await {
        Ok(scores) if scores.len() == request_count => {
            for (request, score) in batch.into_iter().zip(scores) {
                let _ = request.respond_to.send(Ok(score));
            }
        }
        Ok(scores) => {
            // A partial response is a vendor fault for the whole batch.
            let err = VendorError::InvalidResponse(format!(
                "expected {request_count} scores, got {}",
                scores.len()
            ));
            for request in batch {
                let _ = request.respond_to.send(Err(err.clone()));
            }
        }
        Err(err) => {
            // Batched failure surfaces to every pending caller equally.
            for request in batch {
                let _ = request.respond_to.send(Err(err.clone()));
            }
        }
    }

    // The vendor call happened either way; the cost was spent.
    events.publish(ModerationEvent::BatchProcessed {
        vendor: config.name.clone(),
        request_count,
        cost: config.cost_per_request * request_count as f64,
    });
}

// ============================================================================
// TESTS
// ============================================================================
