// This is the entry point of the moderation pipeline service.
//
// **Architecture Overview:**
// - `core/` = Business logic (transport-agnostic)
// - `infra/` = Implementations of core traits (storage, vendor APIs)
//
// This file's job is to:
// 1. Load configuration from the environment
// 2. Initialize services (dependency injection)
// 3. Run the line-delimited JSON loop over stdin/stdout

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::aggregate::Aggregator;
use crate::core::breaker::{BreakerConfig, CircuitBreaker};
use crate::core::cache::{ResultCache, VerdictStore};
use crate::core::content::ContentSubmission;
use crate::core::dispatch::{VendorConfig, VendorDispatcher};
use crate::core::duplicates::DuplicateIndex;
use crate::core::events::{EventBus, ModerationEvent};
use crate::core::fallback::{FallbackClassifier, FallbackRule};
use crate::core::hashing::HashingEngine;
use crate::core::pipeline::{ModerationPipeline, PipelineConfig};
use crate::core::vendors::VendorClient;
use crate::infra::cache::{InMemoryVerdictStore, SqliteVerdictStore};
use crate::infra::vendors::{OpenAiModerationClient, PerspectiveClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Read an env var and parse it, falling back to a default on absence or
/// parse failure.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn pipeline_config_from_env() -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        duplicate_threshold: env_parse(
            "MODGUARD_DUPLICATE_THRESHOLD",
            defaults.duplicate_threshold,
        ),
        verdict_ttl: Duration::from_secs(env_parse(
            "MODGUARD_VERDICT_TTL_SECS",
            defaults.verdict_ttl.as_secs(),
        )),
        fallback_ttl: Duration::from_secs(env_parse(
            "MODGUARD_FALLBACK_TTL_SECS",
            defaults.fallback_ttl.as_secs(),
        )),
        vendor_timeout: Duration::from_secs(env_parse(
            "MODGUARD_VENDOR_TIMEOUT_SECS",
            defaults.vendor_timeout.as_secs(),
        )),
        batch_chunk_size: env_parse("MODGUARD_BATCH_CHUNK_SIZE", defaults.batch_chunk_size),
    }
}

/// Build the configured vendor clients. A vendor is enabled by the presence
/// of its API key.
fn vendors_from_env() -> Vec<(VendorConfig, Arc<dyn VendorClient>)> {
    let max_batch_size = env_parse("MODGUARD_MAX_BATCH_SIZE", 10_usize);
    let flush_interval =
        Duration::from_millis(env_parse("MODGUARD_FLUSH_INTERVAL_MS", 100_u64));

    let mut vendors: Vec<(VendorConfig, Arc<dyn VendorClient>)> = Vec::new();

    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        vendors.push((
            VendorConfig {
                name: "openai".to_string(),
                max_batch_size,
                flush_interval,
                cost_per_request: env_parse("MODGUARD_OPENAI_COST", 0.002_f64),
            },
            Arc::new(OpenAiModerationClient::new(api_key)),
        ));
    }

    if let Ok(api_key) = std::env::var("PERSPECTIVE_API_KEY") {
        vendors.push((
            VendorConfig {
                name: "perspective".to_string(),
                max_batch_size,
                flush_interval,
                cost_per_request: env_parse("MODGUARD_PERSPECTIVE_COST", 0.001_f64),
            },
            Arc::new(PerspectiveClient::new(api_key)),
        ));
    }

    vendors
}

/// Fallback rules come from `MODGUARD_FALLBACK_RULES` as comma-separated
/// `term:category` pairs; unset or empty keeps the built-in rule set.
fn fallback_from_env() -> FallbackClassifier {
    let raw = match std::env::var("MODGUARD_FALLBACK_RULES") {
        Ok(raw) if !raw.trim().is_empty() => raw,
        _ => return FallbackClassifier::with_default_rules(),
    };

    let rules: Vec<FallbackRule> = raw
        .split(',')
        .filter_map(|pair| {
            let (term, category) = pair.split_once(':')?;
            let (term, category) = (term.trim(), category.trim());
            if term.is_empty() || category.is_empty() {
                tracing::warn!(pair, "Skipping malformed fallback rule");
                return None;
            }
            Some(FallbackRule::new(term, category))
        })
        .collect();

    if rules.is_empty() {
        tracing::warn!("MODGUARD_FALLBACK_RULES contained no usable rules, using defaults");
        FallbackClassifier::with_default_rules()
    } else {
        FallbackClassifier::new(rules, env_parse("MODGUARD_FALLBACK_CONFIDENCE", 0.6))
    }
}

fn breaker_config_from_env() -> BreakerConfig {
    let defaults = BreakerConfig::default();
    BreakerConfig {
        failure_threshold: env_parse(
            "MODGUARD_BREAKER_FAILURE_THRESHOLD",
            defaults.failure_threshold,
        ),
        recovery_timeout: Duration::from_secs(env_parse(
            "MODGUARD_BREAKER_RECOVERY_SECS",
            defaults.recovery_timeout.as_secs(),
        )),
        ..defaults
    }
}

/// Log every pipeline event. This is the default event sink; operators can
/// point additional subscribers at the same bus.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ModerationEvent::BatchProcessed {
                    vendor,
                    request_count,
                    cost,
                }) => {
                    tracing::info!(vendor, request_count, cost, "Batch processed");
                }
                Ok(ModerationEvent::CircuitOpened { vendor }) => {
                    tracing::warn!(vendor, "Circuit opened, routing to fallback");
                }
                Ok(ModerationEvent::CircuitClosed { vendor }) => {
                    tracing::info!(vendor, "Circuit closed, vendor restored");
                }
                Ok(ModerationEvent::ProcessingError { content_id, cause }) => {
                    tracing::error!(content_id, cause, "Processing error");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Read line-delimited JSON submissions from stdin and write one JSON
/// outcome per line to stdout. Two bare commands are recognized:
/// `!metrics` prints a counters snapshot, `!reset` zeroes them.
async fn run_stdio_loop<S: VerdictStore + 'static>(
    pipeline: Arc<ModerationPipeline<S>>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let output = match line {
            "!metrics" => json!(pipeline.metrics_snapshot()),
            "!reset" => {
                pipeline.reset_metrics();
                json!({ "reset": true })
            }
            _ => match serde_json::from_str::<ContentSubmission>(line) {
                Ok(submission) => {
                    let content_id = submission.id.clone();
                    match pipeline.process(submission).await {
                        Ok(outcome) => json!(outcome),
                        Err(err) => json!({ "content_id": content_id, "error": err.to_string() }),
                    }
                }
                Err(err) => json!({ "error": format!("unparseable submission: {err}") }),
            },
        };

        stdout.write_all(output.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("Input closed, shutting down");
    pipeline.shutdown().await;
    Ok(())
}

fn build_pipeline<S: VerdictStore + 'static>(
    store: S,
    events: EventBus,
) -> anyhow::Result<Arc<ModerationPipeline<S>>> {
    let vendors = vendors_from_env();
    if vendors.is_empty() {
        anyhow::bail!(
            "No vendors configured - set OPENAI_API_KEY and/or PERSPECTIVE_API_KEY"
        );
    }
    let dispatcher = Arc::new(VendorDispatcher::new(vendors, events.clone()));
    let vendor_names = dispatcher.vendor_names();
    tracing::info!(vendors = ?vendor_names, "Configured vendors");

    let breaker_config = breaker_config_from_env();
    let breakers = vendor_names
        .into_iter()
        .map(|name| {
            Arc::new(CircuitBreaker::new(
                name,
                breaker_config.clone(),
                events.clone(),
            ))
        })
        .collect();

    Ok(ModerationPipeline::new(
        pipeline_config_from_env(),
        HashingEngine::new(),
        ResultCache::new(store),
        DuplicateIndex::new(HashingEngine::new()),
        dispatcher,
        breakers,
        Aggregator::default(),
        Arc::new(fallback_from_env()),
        events,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let events = EventBus::default();
    spawn_event_logger(&events);

    // DATABASE_URL selects the sqlite store; without it verdicts live in
    // process memory and die with it.
    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            tracing::info!(database_url, "Using sqlite verdict store");
            let store = SqliteVerdictStore::new(&database_url).await?;
            let pipeline = build_pipeline(store, events)?;
            run_stdio_loop(pipeline).await
        }
        Err(_) => {
            tracing::info!("Using in-memory verdict store");
            let pipeline = build_pipeline(InMemoryVerdictStore::new(), events)?;
            run_stdio_loop(pipeline).await
        }
    }
}
