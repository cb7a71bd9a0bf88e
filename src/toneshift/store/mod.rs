//! Shared state store abstraction.
//!
//! All cross-instance coordination (job records, locks, rate-limit counters,
//! cached artifacts) goes through the [`SharedStore`] trait. The production
//! backend is Redis ([`RedisStore`]); [`InMemoryStore`] backs tests and
//! single-instance deployments. The concrete backend is injected at
//! construction time, never referenced as a process-wide singleton.
//!
//! The trait deliberately exposes only the four primitives the core needs:
//!
//! - `get`: read a value
//! - `set_ex`: unconditional write with a TTL
//! - `set_nx_ex`: write-if-absent with a TTL (the sole serialization point
//!   for mutual exclusion)
//! - `del`: delete a key
//!
//! The store is treated as unreliable. Every caller in this crate has a
//! defined fallback on [`StoreError`]; nothing above the store layer
//! propagates one to its own callers.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Errors surfaced by a store backend.
///
/// Callers distinguish "could not reach the store" from "the store rejected
/// the operation" mostly for logging; both degrade the same way.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached (connection refused, dropped, timeout).
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The backend was reachable but the operation failed.
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Minimal key-value contract shared by all coordination state.
///
/// Semantics every backend must preserve:
///
/// - `set_nx_ex` is atomic: of N concurrent callers for an absent key,
///   exactly one observes `true`.
/// - TTLs are absolute from the moment of the write; a later `set_ex`
///   replaces both value and TTL (sliding expiration is the caller's
///   re-write, not a store feature).
/// - An expired key is indistinguishable from one that never existed.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch a value. `None` covers both "never set" and "expired".
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional write with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Write only if the key is absent, with a TTL. Returns `true` iff this
    /// caller performed the write.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}
