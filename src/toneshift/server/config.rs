//! Toneshift core configuration
//!
//! Configuration for the admission/dedup/cache layer. Supports layered
//! configuration:
//! 1. Defaults (local Redis, one-hour TTLs)
//! 2. Builder pattern (for runtime customization and tests)
//! 3. Environment variables (for deployment)
//!
//! # Environment Variables
//! - `TONESHIFT_REDIS_URL`: shared store endpoint (default: redis://127.0.0.1:6379)
//! - `TONESHIFT_JOB_TTL_SECS`: job record TTL (default: 3600)
//! - `TONESHIFT_LOCK_TTL_SECS`: job lock TTL (default: 300)
//! - `TONESHIFT_CACHE_TTL_SECS`: result cache TTL (default: 3600)
//! - `TONESHIFT_TEXT_KEY_PREFIX_CHARS`: cache-key text sample length (default: 500)
//!
//! Call [`TransformCoreConfig::validate`] at startup: the lock TTL must sit
//! strictly below the job TTL, since the lock is the crash-recovery timeout
//! for a job that is expected to outlive it in the store.

use std::env;
use std::time::Duration;

/// Configuration for the transform core (job manager, result cache, and the
/// store they share).
#[derive(Debug, Clone)]
pub struct TransformCoreConfig {
    /// Shared store endpoint.
    pub redis_url: String,

    /// TTL applied to job records on every write (sliding expiration).
    pub job_ttl: Duration,

    /// TTL of the per-job mutual-exclusion lock. Doubles as the
    /// crash-recovery timeout: a holder that dies without releasing blocks
    /// other runners for at most this long.
    pub lock_ttl: Duration,

    /// TTL of cached transformation artifacts.
    pub cache_ttl: Duration,

    /// How many leading characters of a text source participate in its cache
    /// key. Bounded on purpose; see the cache module docs.
    pub text_key_prefix_chars: usize,
}

/// Configuration rejected by [`TransformCoreConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The lock TTL must be strictly shorter than the job TTL.
    #[error("lock TTL ({lock_ttl_secs}s) must be shorter than job TTL ({job_ttl_secs}s)")]
    LockTtlTooLong {
        lock_ttl_secs: u64,
        job_ttl_secs: u64,
    },

    /// A TTL of zero would make the corresponding record unstorable.
    #[error("{field} must be non-zero")]
    ZeroDuration { field: &'static str },

    /// A zero-length text sample would collapse every text source onto one
    /// cache key.
    #[error("text_key_prefix_chars must be non-zero")]
    ZeroTextPrefix,
}

impl TransformCoreConfig {
    /// Create a configuration with default values. Use builder methods to
    /// customize.
    pub fn new() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            job_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(300),
            cache_ttl: Duration::from_secs(3600),
            text_key_prefix_chars: 500,
        }
    }

    /// Load configuration from environment variables with fallback to
    /// defaults. Unparseable values fall back silently; `validate` is the
    /// place where bad combinations get rejected.
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let redis_url =
            env::var("TONESHIFT_REDIS_URL").unwrap_or_else(|_| defaults.redis_url.clone());

        let job_ttl = env::var("TONESHIFT_JOB_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_ttl);

        let lock_ttl = env::var("TONESHIFT_LOCK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.lock_ttl);

        let cache_ttl = env::var("TONESHIFT_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);

        let text_key_prefix_chars = env::var("TONESHIFT_TEXT_KEY_PREFIX_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.text_key_prefix_chars);

        Self {
            redis_url,
            job_ttl,
            lock_ttl,
            cache_ttl,
            text_key_prefix_chars,
        }
    }

    /// Set the shared store endpoint.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Set the job record TTL.
    pub fn with_job_ttl(mut self, ttl: Duration) -> Self {
        self.job_ttl = ttl;
        self
    }

    /// Set the job lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Set the result cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the text-source cache-key sample length.
    pub fn with_text_key_prefix_chars(mut self, chars: usize) -> Self {
        self.text_key_prefix_chars = chars;
        self
    }

    /// Check startup invariants.
    ///
    /// A lock that can outlive its job record would let a crashed holder
    /// block reruns of a job the store has already forgotten, so
    /// `lock_ttl < job_ttl` is enforced here rather than documented and
    /// hoped for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "job_ttl" });
        }
        if self.lock_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "lock_ttl" });
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "cache_ttl" });
        }
        if self.text_key_prefix_chars == 0 {
            return Err(ConfigError::ZeroTextPrefix);
        }
        if self.lock_ttl >= self.job_ttl {
            return Err(ConfigError::LockTtlTooLong {
                lock_ttl_secs: self.lock_ttl.as_secs(),
                job_ttl_secs: self.job_ttl.as_secs(),
            });
        }
        Ok(())
    }

    /// Get a summary of the configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Toneshift core configuration: store={}, job_ttl={}s, lock_ttl={}s, cache_ttl={}s, text_key_prefix={}",
            self.redis_url,
            self.job_ttl.as_secs(),
            self.lock_ttl.as_secs(),
            self.cache_ttl.as_secs(),
            self.text_key_prefix_chars,
        )
    }
}

impl Default for TransformCoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransformCoreConfig::default();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.job_ttl, Duration::from_secs(3600));
        assert_eq!(config.lock_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.text_key_prefix_chars, 500);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(TransformCoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = TransformCoreConfig::new()
            .with_redis_url("redis://cache-1:6379")
            .with_job_ttl(Duration::from_secs(7200))
            .with_lock_ttl(Duration::from_secs(120))
            .with_cache_ttl(Duration::from_secs(1800))
            .with_text_key_prefix_chars(256);

        assert_eq!(config.redis_url, "redis://cache-1:6379");
        assert_eq!(config.job_ttl, Duration::from_secs(7200));
        assert_eq!(config.lock_ttl, Duration::from_secs(120));
        assert_eq!(config.cache_ttl, Duration::from_secs(1800));
        assert_eq!(config.text_key_prefix_chars, 256);
    }

    #[test]
    fn test_validate_rejects_lock_ttl_at_or_above_job_ttl() {
        let equal = TransformCoreConfig::new()
            .with_job_ttl(Duration::from_secs(300))
            .with_lock_ttl(Duration::from_secs(300));
        assert!(matches!(
            equal.validate(),
            Err(ConfigError::LockTtlTooLong { .. })
        ));

        let above = TransformCoreConfig::new()
            .with_job_ttl(Duration::from_secs(300))
            .with_lock_ttl(Duration::from_secs(600));
        assert!(matches!(
            above.validate(),
            Err(ConfigError::LockTtlTooLong { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = TransformCoreConfig::new().with_job_ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration { field: "job_ttl" })
        ));

        let config = TransformCoreConfig::new().with_cache_ttl(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration { field: "cache_ttl" })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_text_prefix() {
        let config = TransformCoreConfig::new().with_text_key_prefix_chars(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTextPrefix)));
    }

    #[test]
    fn test_from_env_with_defaults() {
        // Only touch variables no other test sets; tests share the process
        // environment and run in parallel.
        unsafe {
            env::remove_var("TONESHIFT_REDIS_URL");
            env::remove_var("TONESHIFT_TEXT_KEY_PREFIX_CHARS");
        }

        let config = TransformCoreConfig::from_env();
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.text_key_prefix_chars, 500);
    }

    #[test]
    fn test_from_env_with_overrides() {
        unsafe {
            env::set_var("TONESHIFT_JOB_TTL_SECS", "7200");
            env::set_var("TONESHIFT_LOCK_TTL_SECS", "60");
        }

        let config = TransformCoreConfig::from_env();
        assert_eq!(config.job_ttl, Duration::from_secs(7200));
        assert_eq!(config.lock_ttl, Duration::from_secs(60));

        unsafe {
            env::remove_var("TONESHIFT_JOB_TTL_SECS");
            env::remove_var("TONESHIFT_LOCK_TTL_SECS");
        }
    }

    #[test]
    fn test_from_env_ignores_unparseable_values() {
        unsafe {
            env::set_var("TONESHIFT_CACHE_TTL_SECS", "not-a-number");
        }

        let config = TransformCoreConfig::from_env();
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));

        unsafe {
            env::remove_var("TONESHIFT_CACHE_TTL_SECS");
        }
    }

    #[test]
    fn test_summary() {
        let summary = TransformCoreConfig::default().summary();
        assert!(summary.contains("redis://127.0.0.1:6379"));
        assert!(summary.contains("job_ttl=3600s"));
        assert!(summary.contains("lock_ttl=300s"));
    }
}
