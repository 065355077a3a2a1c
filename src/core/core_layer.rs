// The core module contains all pipeline business logic.
// Each component gets its own submodule; nothing in here talks HTTP or SQL.

#[path = "aggregate/aggregator.rs"]
pub mod aggregate;

#[path = "breaker/circuit_breaker.rs"]
pub mod breaker;

#[path = "cache/cache_service.rs"]
pub mod cache;

#[path = "content/mod.rs"]
pub mod content;

#[path = "dispatch/vendor_dispatcher.rs"]
pub mod dispatch;

#[path = "duplicates/duplicate_index.rs"]
pub mod duplicates;

#[path = "events/event_bus.rs"]
pub mod events;

#[path = "fallback/fallback_service.rs"]
pub mod fallback;

#[path = "hashing/hashing_service.rs"]
pub mod hashing;

#[path = "metrics/performance_metrics.rs"]
pub mod metrics;

#[path = "pipeline/mod.rs"]
pub mod pipeline;

#[path = "vendors/vendor_models.rs"]
pub mod vendors;
