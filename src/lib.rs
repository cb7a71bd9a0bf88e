//! # toneshift
//!
//! Core admission, deduplication, and caching layer for a persona-styled
//! content-transformation service. The expensive compute path (content fetch,
//! cleaning, and the external model call) is wrapped behind a pipeline trait;
//! this crate provides everything that decides whether that path runs at all:
//!
//! - **Job manager**: deterministic job identity derived from the request
//!   fingerprint, cross-process mutual exclusion via the shared store, and a
//!   TTL-governed job lifecycle record (status, stage, progress, result).
//! - **Rate limiter**: fixed-window, per-tier admission control with a
//!   process-local fallback when the shared store is unreachable.
//! - **Result cache**: finished artifacts keyed by (source identity, persona)
//!   so identical requests skip the compute path entirely.
//!
//! Coordination across service instances is mediated entirely by an external
//! key-value store (Redis in production) reached through the `SharedStore`
//! trait; every component degrades gracefully when that store is down.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toneshift::{
//!     InMemoryStore, SourceInput, TransformCoreConfig, TransformJobServer,
//!     TransformOptions, TransformRequest,
//! };
//!
//! let config = TransformCoreConfig::from_env();
//! config.validate()?;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let server = TransformJobServer::with_config(store, Arc::new(MyPipeline), config);
//!
//! let request = TransformRequest::new(
//!     SourceInput::Url("https://example.com/article".to_string()),
//!     "pirate",
//!     TransformOptions::default(),
//! );
//! let outcome = server.submit(&request).await;
//! ```

pub mod toneshift;

// Re-export main API at crate root for easy access
pub use toneshift::cache::ResultCache;
pub use toneshift::pipeline::{
    PipelineError, SourceInput, TransformArtifact, TransformOptions, TransformPipeline,
    TransformRequest,
};
pub use toneshift::server::config::{ConfigError, TransformCoreConfig};
pub use toneshift::server::job_manager::{
    JobManager, JobProgress, JobRecord, JobStage, JobStatus, JobUpdate, compute_job_id,
};
pub use toneshift::server::job_server::{TransformJobServer, TransformOutcome};
pub use toneshift::server::rate_limiter::{
    AccountProfile, CallerContext, EndpointClass, RateLimitDecision, RateLimitRejection,
    RateLimiter, Tier, TierQuota, TierResolution, TieredRateLimiter, caller_route_key, tier_quota,
};
pub use toneshift::store::{InMemoryStore, RedisStore, SharedStore, StoreError};
