//! Result cache for finished transformation artifacts.
//!
//! Keyed by the semantic identity of a request (source plus persona) so an
//! identical future request skips the compute path entirely. Caching is an
//! optimization, never a correctness dependency: every store or parse error
//! degrades to a miss, and writes are best-effort.
//!
//! Key layout:
//!
//! - URL sources: `transform:<persona>:<sha256(url)>`
//! - Text sources: `transform:text:<persona>:<sha256(prefix)>` where the
//!   prefix is the first `text_prefix_chars` characters of the body.
//!
//! The bounded text prefix keeps keys small at the cost of a deliberate
//! collision window: two distinct long documents sharing the same prefix
//! share one cache entry. Changing that keying changes cache-hit semantics
//! for every text caller; do not "fix" it casually.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::toneshift::fingerprint::sha256_hex;
use crate::toneshift::pipeline::{SourceInput, TransformArtifact};
use crate::toneshift::store::SharedStore;

const CACHE_KEY_PREFIX: &str = "transform:";

/// Cache of finished artifacts in the shared store, fixed TTL per entry.
/// Entries are immutable: a re-run overwrites wholesale, never patches.
pub struct ResultCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
    text_prefix_chars: usize,
}

impl ResultCache {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration, text_prefix_chars: usize) -> Self {
        Self {
            store,
            ttl,
            text_prefix_chars,
        }
    }

    /// Deterministic cache key for a (source, persona) pair.
    pub fn cache_key(&self, source: &SourceInput, persona: &str) -> String {
        match source {
            SourceInput::Url(url) => {
                format!("{}{}:{}", CACHE_KEY_PREFIX, persona, sha256_hex(url))
            }
            SourceInput::Text(text) => {
                let prefix: String = text.chars().take(self.text_prefix_chars).collect();
                format!("{}text:{}:{}", CACHE_KEY_PREFIX, persona, sha256_hex(&prefix))
            }
        }
    }

    /// Look up a cached artifact. Any failure along the way is a miss.
    pub async fn get(&self, source: &SourceInput, persona: &str) -> Option<TransformArtifact> {
        let key = self.cache_key(source, persona);
        let raw = match self.store.get(&key).await {
            Ok(value) => value?,
            Err(err) => {
                warn!("Cache read for '{}' failed, treating as miss: {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(artifact) => {
                debug!("Cache hit for '{}'", key);
                Some(artifact)
            }
            Err(err) => {
                warn!("Discarding unparseable cache entry '{}': {}", key, err);
                None
            }
        }
    }

    /// Store an artifact with the fixed TTL. Returns the key it was stored
    /// under (derived either way; useful as a job back-reference even when
    /// the write itself fails). Failures are logged and swallowed.
    pub async fn set(
        &self,
        source: &SourceInput,
        persona: &str,
        artifact: &TransformArtifact,
    ) -> String {
        let key = self.cache_key(source, persona);
        let json = match serde_json::to_string(artifact) {
            Ok(json) => json,
            Err(err) => {
                warn!("Failed to serialize artifact for '{}': {}", key, err);
                return key;
            }
        };
        if let Err(err) = self.store.set_ex(&key, &json, self.ttl).await {
            warn!("Best-effort cache write for '{}' failed: {}", key, err);
        }
        key
    }

    /// Drop the entry for a (source, persona) pair to force recomputation.
    pub async fn invalidate(&self, source: &SourceInput, persona: &str) {
        let key = self.cache_key(source, persona);
        if let Err(err) = self.store.del(&key).await {
            warn!("Cache invalidation for '{}' failed: {}", key, err);
        }
    }
}
