//! Redis-backed store client.
//!
//! A thin wrapper over `redis::aio::ConnectionManager`. The manager handles
//! reconnection internally and is cheap to clone, so each operation clones a
//! handle instead of serializing callers on a single connection.
//!
//! Failures map onto [`StoreError`] and stop here; callers decide how to
//! degrade (fail-closed locks, local-fallback counters, miss-on-error reads).

use async_trait::async_trait;
use log::info;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{SharedStore, StoreError};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Operation(err.to_string())
        }
    }
}

/// Shared store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Fails only if the URL is invalid or the initial connection cannot be
    /// established; once constructed, the connection manager reconnects on
    /// its own and individual operations report [`StoreError`] instead.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Connected to shared store at {}", url);
        Ok(Self { manager })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // Redis rejects a zero expiry; clamp up to the smallest legal TTL.
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, Self::ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        // SET key value NX EX <secs> answers OK on write, Nil when the key
        // already exists; that distinction is the whole locking protocol.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
