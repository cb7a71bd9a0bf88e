//! Scenario tests for fixed-window admission and tier handling.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use toneshift::{
    AccountProfile, CallerContext, EndpointClass, InMemoryStore, RateLimiter, SharedStore,
    StoreError, Tier, TieredRateLimiter, tier_quota,
};

/// Store double simulating a total outage.
struct UnreachableStore;

#[async_trait]
impl SharedStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_nx_ex(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn del(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_single_slot_window_admits_then_rejects() {
    // max=1 over a 60s window: first request admitted with nothing left,
    // second rejected with a retry hint inside the window.
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), 1, Duration::from_secs(60));

    let first = limiter.check("caller:/transform").await;
    assert!(first.allowed);
    assert_eq!(first.limit, 1);
    assert_eq!(first.remaining, 0);

    let second = limiter.check("caller:/transform").await;
    assert!(!second.allowed);
    assert_eq!(second.remaining, 0);
    let retry_after = second.retry_after_secs.unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    let body = second.rejection().unwrap();
    assert!(!body.success);
    assert_eq!(body.retry_after, retry_after);
    assert!(body.error.contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_counter_resets_to_one_after_window() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), 2, Duration::from_millis(60));

    assert!(limiter.check("k").await.allowed);
    assert!(limiter.check("k").await.allowed);
    assert!(!limiter.check("k").await.allowed);

    tokio::time::sleep(Duration::from_millis(90)).await;

    let fresh = limiter.check("k").await;
    assert!(fresh.allowed);
    // Count restarted at 1, so one slot remains of the quota of 2.
    assert_eq!(fresh.remaining, 1);
}

#[tokio::test]
async fn test_tier_isolation_same_caller() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = TieredRateLimiter::new(store, EndpointClass::Transform);

    // Burn the entire free quota for this caller.
    let free_quota = tier_quota(EndpointClass::Transform, Tier::Free).max_requests;
    let free_ctx = CallerContext::new("203.0.113.7");
    for _ in 0..free_quota {
        let (tier, decision) = limiter.check(&free_ctx).await;
        assert_eq!(tier, Tier::Free);
        assert!(decision.allowed);
    }
    let (_, exhausted) = limiter.check(&free_ctx).await;
    assert!(!exhausted.allowed);

    // The same caller resolved as premium counts under a different key and
    // is unaffected.
    let premium_ctx = CallerContext::new("203.0.113.7").with_account(AccountProfile {
        membership: Some("premium".to_string()),
        role: None,
    });
    let (tier, decision) = limiter.check(&premium_ctx).await;
    assert_eq!(tier, Tier::Premium);
    assert!(decision.allowed);
    assert_eq!(
        decision.limit,
        tier_quota(EndpointClass::Transform, Tier::Premium).max_requests
    );
}

#[tokio::test]
async fn test_endpoint_classes_do_not_interact() {
    let store = Arc::new(InMemoryStore::new());
    let transform = TieredRateLimiter::new(store.clone(), EndpointClass::Transform);
    let api = TieredRateLimiter::new(store, EndpointClass::Api);

    let ctx = CallerContext::new("203.0.113.8");
    let free_quota = tier_quota(EndpointClass::Transform, Tier::Free).max_requests;
    for _ in 0..free_quota {
        assert!(transform.check(&ctx).await.1.allowed);
    }
    assert!(!transform.check(&ctx).await.1.allowed);

    // Rate-limited on transform, untouched on api.
    assert!(api.check(&ctx).await.1.allowed);
}

#[tokio::test]
async fn test_outage_falls_back_to_local_counting() {
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), 2, Duration::from_secs(60));

    // Traffic keeps flowing and the quota still applies, now per-process.
    assert!(limiter.check("k").await.allowed);
    assert!(limiter.check("k").await.allowed);
    let third = limiter.check("k").await;
    assert!(!third.allowed);
    assert!(third.retry_after_secs.is_some());
}

#[tokio::test]
async fn test_outage_fallback_windows_still_reset() {
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), 1, Duration::from_millis(50));

    assert!(limiter.check("k").await.allowed);
    assert!(!limiter.check("k").await.allowed);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(limiter.check("k").await.allowed);
}

#[tokio::test]
async fn test_fleet_of_limiters_share_store_counters() {
    // Two limiter instances (two service processes) over one store must
    // enforce one combined budget.
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let a = RateLimiter::new(store.clone(), 2, Duration::from_secs(60));
    let b = RateLimiter::new(store, 2, Duration::from_secs(60));

    assert!(a.check("k").await.allowed);
    assert!(b.check("k").await.allowed);
    assert!(!a.check("k").await.allowed);
    assert!(!b.check("k").await.allowed);
}
