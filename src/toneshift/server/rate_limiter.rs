//! Fixed-window rate limiting with tiered quotas.
//!
//! Counters live in the shared store so the whole fleet sees one budget per
//! key. Each counter covers one fixed window: when the window lapses the
//! counter is replaced outright, never carried over (hard reset, not
//! leaky-bucket). Rejection is not a state; it is the read-only outcome of
//! a full counter.
//!
//! If the store is unreachable the limiter must not take traffic down with
//! it: counting falls back to a process-local map (a weaker, per-instance
//! budget) and the fallback is logged rather than surfaced.
//!
//! Tiering: a caller resolves to a [`Tier`] through an ordered resolver
//! chain, and a [`TieredRateLimiter`] tracks each `(caller, endpoint-class,
//! tier)` triple independently: exhausting the `free` budget on one
//! endpoint class says nothing about the same caller's `premium` budget or
//! another class.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::toneshift::store::{SharedStore, StoreError};

/// Default composite key: caller network identity plus route.
pub fn caller_route_key(identity: &str, route: &str) -> String {
    format!("{}:{}", identity, route)
}

/// Consumption within one fixed window, as stored per key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct WindowCounter {
    count: u32,
    /// Window boundary, unix millis. Once `now` passes it the counter is
    /// replaced, not incremented.
    reset_time_ms: i64,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// The configured quota for this key.
    pub limit: u32,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// Seconds until the window resets; populated on rejection (whole
    /// seconds, ceiling).
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    /// Build the client-facing refusal body, if this decision rejected.
    pub fn rejection(&self) -> Option<RateLimitRejection> {
        if self.allowed {
            return None;
        }
        let retry_after = self.retry_after_secs.unwrap_or(1);
        Some(RateLimitRejection {
            success: false,
            error: format!(
                "Rate limit exceeded. Try again in {} second{}.",
                retry_after,
                if retry_after == 1 { "" } else { "s" }
            ),
            retry_after,
        })
    }
}

/// Serializable 429 body: success flag, human-readable error, retry hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRejection {
    pub success: bool,
    pub error: String,
    pub retry_after: u64,
}

/// Fixed-window limiter over the shared store with process-local fallback.
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    max_requests: u32,
    window: Duration,
    /// Degraded-mode counters, used only while the store is unreachable.
    /// Per-instance by design; the weaker guarantee is accepted over
    /// blocking traffic.
    local: Mutex<HashMap<String, WindowCounter>>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, max_requests: u32, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
            local: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject one request under `key`.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now_ms = Utc::now().timestamp_millis();
        match self.check_shared(key, now_ms).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    "Rate limiter for '{}' falling back to process-local counting: {}",
                    key, err
                );
                self.check_local(key, now_ms).await
            }
        }
    }

    async fn check_shared(&self, key: &str, now_ms: i64) -> Result<RateLimitDecision, StoreError> {
        let current = self
            .store
            .get(key)
            .await?
            .and_then(|raw| match serde_json::from_str::<WindowCounter>(&raw) {
                Ok(counter) => Some(counter),
                Err(err) => {
                    warn!("Discarding unparseable counter for '{}': {}", key, err);
                    None
                }
            });

        let (updated, decision) = self.advance(current, now_ms);
        if let Some(counter) = updated {
            let json = serde_json::to_string(&counter).unwrap_or_default();
            self.store.set_ex(key, &json, self.window).await?;
        }
        Ok(decision)
    }

    async fn check_local(&self, key: &str, now_ms: i64) -> RateLimitDecision {
        let mut local = self.local.lock().await;
        local.retain(|_, counter| counter.reset_time_ms > now_ms);

        let (updated, decision) = self.advance(local.get(key).copied(), now_ms);
        if let Some(counter) = updated {
            local.insert(key.to_string(), counter);
        }
        decision
    }

    /// One step of the fixed-window state machine:
    /// absent/expired → fresh window at count 1; live and under quota →
    /// increment; live and full → reject without a write.
    fn advance(
        &self,
        current: Option<WindowCounter>,
        now_ms: i64,
    ) -> (Option<WindowCounter>, RateLimitDecision) {
        let live = current.filter(|counter| now_ms < counter.reset_time_ms);

        match live {
            None => {
                let counter = WindowCounter {
                    count: 1,
                    reset_time_ms: now_ms + self.window.as_millis() as i64,
                };
                if self.max_requests == 0 {
                    // A zero quota admits nothing; still start the window so
                    // retry_after is meaningful.
                    let decision = RateLimitDecision {
                        allowed: false,
                        limit: 0,
                        remaining: 0,
                        retry_after_secs: Some(retry_after_secs(counter.reset_time_ms, now_ms)),
                    };
                    return (Some(counter), decision);
                }
                let decision = RateLimitDecision {
                    allowed: true,
                    limit: self.max_requests,
                    remaining: self.max_requests - 1,
                    retry_after_secs: None,
                };
                (Some(counter), decision)
            }
            Some(counter) if counter.count < self.max_requests => {
                let counter = WindowCounter {
                    count: counter.count + 1,
                    reset_time_ms: counter.reset_time_ms,
                };
                let decision = RateLimitDecision {
                    allowed: true,
                    limit: self.max_requests,
                    remaining: self.max_requests - counter.count,
                    retry_after_secs: None,
                };
                (Some(counter), decision)
            }
            Some(counter) => {
                let decision = RateLimitDecision {
                    allowed: false,
                    limit: self.max_requests,
                    remaining: 0,
                    retry_after_secs: Some(retry_after_secs(counter.reset_time_ms, now_ms)),
                };
                (None, decision)
            }
        }
    }
}

/// Whole seconds until the window boundary, ceiling, never zero.
fn retry_after_secs(reset_time_ms: i64, now_ms: i64) -> u64 {
    let remaining_ms = (reset_time_ms - now_ms).max(0) as u64;
    remaining_ms.div_ceil(1000).max(1)
}

/// Caller classification selecting a quota row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Premium,
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Premium, Tier::Admin];

    pub fn as_str(&self) -> &str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Admin => "admin",
        }
    }

    /// Parse a tier name; `None` for anything unrecognized.
    pub fn parse(value: &str) -> Option<Tier> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "premium" => Some(Tier::Premium),
            "admin" => Some(Tier::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account fields the tier resolvers look at.
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    /// Explicit membership field ("free"/"premium"/"admin"); unrecognized
    /// values fold to free.
    pub membership: Option<String>,
    /// Account role; "admin" and "premium" map onto tiers.
    pub role: Option<String>,
}

/// Everything known about the caller at admission time.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Network identity (typically the client IP or an API key id).
    pub identity: String,
    /// Test-harness override; takes precedence over everything.
    pub test_override: Option<String>,
    /// Resolved account, when the caller is signed in.
    pub account: Option<AccountProfile>,
    /// Request-level tier override header, for controlled testing.
    pub tier_header: Option<String>,
}

impl CallerContext {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn with_test_override(mut self, tier: impl Into<String>) -> Self {
        self.test_override = Some(tier.into());
        self
    }

    pub fn with_account(mut self, account: AccountProfile) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_tier_header(mut self, tier: impl Into<String>) -> Self {
        self.tier_header = Some(tier.into());
        self
    }
}

type TierResolver = Box<dyn Fn(&CallerContext) -> Option<Tier> + Send + Sync>;

/// Ordered chain of tier resolvers, fixed at construction.
///
/// The first resolver returning a tier wins; a caller nothing matches is
/// `free`. The standard chain implements the documented precedence:
/// test-harness override → account membership (unrecognized folds to free) →
/// account role → override header → default free.
pub struct TierResolution {
    resolvers: Vec<TierResolver>,
}

impl TierResolution {
    /// The standard precedence chain.
    pub fn standard() -> Self {
        Self {
            resolvers: vec![
                Box::new(|ctx| ctx.test_override.as_deref().and_then(Tier::parse)),
                Box::new(|ctx| {
                    ctx.account
                        .as_ref()
                        .and_then(|account| account.membership.as_deref())
                        .map(|membership| Tier::parse(membership).unwrap_or(Tier::Free))
                }),
                Box::new(|ctx| {
                    ctx.account
                        .as_ref()
                        .and_then(|account| account.role.as_deref())
                        .and_then(|role| match role.trim().to_ascii_lowercase().as_str() {
                            "admin" => Some(Tier::Admin),
                            "premium" => Some(Tier::Premium),
                            _ => None,
                        })
                }),
                Box::new(|ctx| ctx.tier_header.as_deref().and_then(Tier::parse)),
            ],
        }
    }

    /// A custom chain. Resolvers run in order; the first `Some` wins.
    pub fn from_resolvers(resolvers: Vec<TierResolver>) -> Self {
        Self { resolvers }
    }

    pub fn resolve(&self, ctx: &CallerContext) -> Tier {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver(ctx))
            .unwrap_or(Tier::Free)
    }
}

impl Default for TierResolution {
    fn default() -> Self {
        Self::standard()
    }
}

/// Endpoint classes with independently configured quota tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// The transformation endpoint itself (expensive compute behind it).
    Transform,
    /// Everything else.
    Api,
}

impl EndpointClass {
    pub fn as_str(&self) -> &str {
        match self {
            EndpointClass::Transform => "transform",
            EndpointClass::Api => "api",
        }
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quota row: requests per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierQuota {
    pub max_requests: u32,
    pub window: Duration,
}

/// Static quota table per (endpoint class, tier).
pub fn tier_quota(class: EndpointClass, tier: Tier) -> TierQuota {
    let window = Duration::from_secs(60);
    let max_requests = match (class, tier) {
        (EndpointClass::Transform, Tier::Free) => 10,
        (EndpointClass::Transform, Tier::Premium) => 50,
        (EndpointClass::Transform, Tier::Admin) => 1000,
        (EndpointClass::Api, Tier::Free) => 60,
        (EndpointClass::Api, Tier::Premium) => 300,
        (EndpointClass::Api, Tier::Admin) => 6000,
    };
    TierQuota {
        max_requests,
        window,
    }
}

/// Rate limiter for one endpoint class, keyed per `(caller, class, tier)` so
/// each tier's budget is tracked independently.
pub struct TieredRateLimiter {
    class: EndpointClass,
    resolution: TierResolution,
    limiters: HashMap<Tier, RateLimiter>,
}

impl TieredRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, class: EndpointClass) -> Self {
        Self::with_resolution(store, class, TierResolution::standard())
    }

    pub fn with_resolution(
        store: Arc<dyn SharedStore>,
        class: EndpointClass,
        resolution: TierResolution,
    ) -> Self {
        let limiters = Tier::ALL
            .iter()
            .map(|&tier| {
                let quota = tier_quota(class, tier);
                (
                    tier,
                    RateLimiter::new(store.clone(), quota.max_requests, quota.window),
                )
            })
            .collect();
        Self {
            class,
            resolution,
            limiters,
        }
    }

    pub fn class(&self) -> EndpointClass {
        self.class
    }

    /// Resolve the caller's tier and check its quota for this class.
    pub async fn check(&self, ctx: &CallerContext) -> (Tier, RateLimitDecision) {
        let tier = self.resolution.resolve(ctx);
        let key = format!("{}-{}-{}", ctx.identity, self.class.as_str(), tier.as_str());
        debug!("Rate check for '{}' as {} on {}", ctx.identity, tier, self.class);

        // Construction seeds a limiter per tier, so the lookup cannot miss;
        // guard anyway rather than index.
        let decision = match self.limiters.get(&tier) {
            Some(limiter) => limiter.check(&key).await,
            None => RateLimitDecision {
                allowed: true,
                limit: 0,
                remaining: 0,
                retry_after_secs: None,
            },
        };
        (tier, decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toneshift::store::InMemoryStore;

    fn limiter(max: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryStore::new()), max, window)
    }

    #[test]
    fn test_caller_route_key() {
        assert_eq!(caller_route_key("10.0.0.1", "/transform"), "10.0.0.1:/transform");
    }

    #[tokio::test]
    async fn test_admits_under_quota() {
        let limiter = limiter(3, Duration::from_secs(60));
        let first = limiter.check("k").await;
        assert!(first.allowed);
        assert_eq!(first.limit, 3);
        assert_eq!(first.remaining, 2);

        let second = limiter.check("k").await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);
    }

    #[tokio::test]
    async fn test_rejects_over_quota_with_retry_after() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("k").await.allowed);

        let rejected = limiter.check("k").await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        let retry_after = rejected.retry_after_secs.unwrap();
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_window_reset_readmits() {
        let limiter = limiter(1, Duration::from_millis(50));
        assert!(limiter.check("k").await.allowed);
        assert!(!limiter.check("k").await.allowed);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let after_reset = limiter.check("k").await;
        assert!(after_reset.allowed);
        assert_eq!(after_reset.remaining, 0); // fresh window, count back to 1
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("a").await.allowed);
        assert!(limiter.check("b").await.allowed);
        assert!(!limiter.check("a").await.allowed);
    }

    #[test]
    fn test_rejection_body() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 5,
            remaining: 0,
            retry_after_secs: Some(42),
        };
        let rejection = decision.rejection().unwrap();
        assert!(!rejection.success);
        assert_eq!(rejection.retry_after, 42);
        assert!(rejection.error.contains("42 seconds"));

        let admitted = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 4,
            retry_after_secs: None,
        };
        assert!(admitted.rejection().is_none());
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!(Tier::parse("premium"), Some(Tier::Premium));
        assert_eq!(Tier::parse("  ADMIN "), Some(Tier::Admin));
        assert_eq!(Tier::parse("gold"), None);
    }

    #[test]
    fn test_tier_resolution_precedence() {
        let resolution = TierResolution::standard();

        // Test override beats everything.
        let ctx = CallerContext::new("c")
            .with_test_override("admin")
            .with_account(AccountProfile {
                membership: Some("free".to_string()),
                role: None,
            });
        assert_eq!(resolution.resolve(&ctx), Tier::Admin);

        // Membership beats role and header.
        let ctx = CallerContext::new("c")
            .with_account(AccountProfile {
                membership: Some("premium".to_string()),
                role: Some("admin".to_string()),
            })
            .with_tier_header("admin");
        assert_eq!(resolution.resolve(&ctx), Tier::Premium);

        // Unrecognized membership folds to free and terminates the chain.
        let ctx = CallerContext::new("c").with_account(AccountProfile {
            membership: Some("platinum".to_string()),
            role: Some("admin".to_string()),
        });
        assert_eq!(resolution.resolve(&ctx), Tier::Free);

        // Role maps when membership is absent.
        let ctx = CallerContext::new("c").with_account(AccountProfile {
            membership: None,
            role: Some("admin".to_string()),
        });
        assert_eq!(resolution.resolve(&ctx), Tier::Admin);

        // Header applies when the account says nothing.
        let ctx = CallerContext::new("c").with_tier_header("premium");
        assert_eq!(resolution.resolve(&ctx), Tier::Premium);

        // Default.
        assert_eq!(resolution.resolve(&CallerContext::new("c")), Tier::Free);
    }

    #[test]
    fn test_quota_table() {
        assert_eq!(
            tier_quota(EndpointClass::Transform, Tier::Free).max_requests,
            10
        );
        assert_eq!(
            tier_quota(EndpointClass::Transform, Tier::Admin).max_requests,
            1000
        );
        assert_eq!(tier_quota(EndpointClass::Api, Tier::Premium).max_requests, 300);
        assert_eq!(
            tier_quota(EndpointClass::Api, Tier::Free).window,
            Duration::from_secs(60)
        );
    }

    #[tokio::test]
    async fn test_tiered_limiter_keys_by_tier() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = TieredRateLimiter::new(store.clone(), EndpointClass::Transform);

        let free_ctx = CallerContext::new("10.0.0.9");
        let (tier, decision) = limiter.check(&free_ctx).await;
        assert_eq!(tier, Tier::Free);
        assert!(decision.allowed);

        // The counter landed under the composite key.
        assert!(
            store
                .get("10.0.0.9-transform-free")
                .await
                .unwrap()
                .is_some()
        );
    }
}
