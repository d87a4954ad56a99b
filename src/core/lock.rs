// src/core/lock.rs

//! Distributed advisory locks built on `SET NX PX` with token ownership.
//!
//! A lock is a key holding a random token. Release is a server-side atomic
//! compare-and-delete, so only the holder of the token can free the lock and
//! an expired-and-reacquired lock is never deleted by its former owner.

use crate::client::Client;
use crate::core::ClientError;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Deletes the key only when it still holds the caller's token.
const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

fn default_retry_interval() -> Duration {
    Duration::from_millis(50)
}

/// An opaque random token identifying one acquisition of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        LockToken(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acquires and releases advisory locks through a [`Client`].
#[derive(Clone)]
pub struct LockManager {
    client: Client,
    retry_interval: Duration,
}

impl LockManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_interval: default_retry_interval(),
        }
    }

    /// Overrides the polling cadence used while waiting for a held lock.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Attempts to take `name` for `ttl`, retrying until `wait_timeout`
    /// elapses. Returns the owning token, or `None` on timeout.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
        wait_timeout: Duration,
    ) -> Result<Option<LockToken>, ClientError> {
        let token = LockToken::generate();
        let deadline = tokio::time::Instant::now() + wait_timeout;

        loop {
            if self
                .client
                .set_nx_px(name, Bytes::from(token.0.clone()), ttl)
                .await?
            {
                debug!(lock = name, "lock acquired");
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            // Small jitter keeps concurrent waiters from polling in step.
            let jitter_ms = rand::random::<u64>() % (self.retry_interval.as_millis() as u64 / 2 + 1);
            let pause = self.retry_interval + Duration::from_millis(jitter_ms);
            tokio::time::sleep(pause.min(deadline - tokio::time::Instant::now())).await;
        }
    }

    /// Like [`try_acquire`](Self::try_acquire) but a timeout raises
    /// [`ClientError::LockUnavailable`].
    pub async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
        wait_timeout: Duration,
    ) -> Result<LockToken, ClientError> {
        self.try_acquire(name, ttl, wait_timeout)
            .await?
            .ok_or_else(|| ClientError::LockUnavailable(name.to_string()))
    }

    /// Releases `name` iff it is still held by `token`. Returns whether the
    /// lock was actually released.
    pub async fn release(&self, name: &str, token: &LockToken) -> Result<bool, ClientError> {
        let reply = self
            .client
            .eval(
                RELEASE_SCRIPT,
                &[Bytes::from(name.to_string())],
                &[Bytes::from(token.0.clone())],
            )
            .await?;
        Ok(reply.as_int()? == 1)
    }

    /// Non-authoritative existence check: the lock may expire or change
    /// hands immediately after this returns.
    pub async fn is_locked(&self, name: &str) -> Result<bool, ClientError> {
        self.client.exists(name).await
    }

    /// Scoped acquisition: runs `body` iff the lock was taken, and releases
    /// it whether the body succeeds or fails.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        ttl: Duration,
        wait_timeout: Duration,
        body: F,
    ) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let token = self.acquire(name, ttl, wait_timeout).await?;
        let outcome = body().await;
        if let Err(err) = self.release(name, &token).await {
            warn!(lock = name, error = %err, "failed to release lock");
        }
        outcome
    }
}
