//! The rotating credential pool.
//!
//! Two tiers: a bounded **hot** queue of activated credentials that callers
//! check out one at a time, and a **cold** stack of raw blobs activated only
//! when the hot side runs under capacity. Hot checkout blocks while the pool
//! still has active credentials; the cold stack never blocks anyone.
//!
//! Checkout discipline: every [`CredentialPool::acquire`] is paired with
//! exactly one [`CredentialPool::release`] (identity still good) or
//! [`CredentialPool::discard`] (identity throttled out). The call envelope
//! owns that pairing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, instrument, warn};

use super::{Credential, CredentialSource};
use crate::auth::AuthError;

/// Credential pool failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every credential has been discarded and the cold stack is empty.
    #[error("no usable credentials remain in the pool")]
    NoCredentials,
}

/// Bounded pool of activated credentials with lazy cold promotion.
pub struct CredentialPool {
    source: Arc<dyn CredentialSource>,
    capacity: usize,
    /// Activated credentials ready for checkout.
    hot: Mutex<VecDeque<Credential>>,
    /// One permit per queued hot credential; acquirers park here.
    available: Semaphore,
    /// Raw blobs not yet activated, consumed newest-first.
    cold: tokio::sync::Mutex<Vec<Vec<u8>>>,
    /// Count of live credentials (hot + checked out). Watch so that blocked
    /// acquirers observe the drop to zero.
    active: watch::Sender<usize>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("capacity", &self.capacity)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl CredentialPool {
    /// Loads all candidate credentials from `source`, activating the first
    /// `capacity` of them into the hot queue and stacking the remainder as
    /// cold blobs. Warm candidates that fail activation are dropped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] only when enumeration itself fails; individual
    /// credential failures are skipped.
    #[instrument(skip(source))]
    pub async fn init(
        source: Arc<dyn CredentialSource>,
        capacity: usize,
    ) -> Result<Self, AuthError> {
        let blobs = source.enumerate()?;
        let pool = Self {
            source,
            capacity,
            hot: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(0),
            cold: tokio::sync::Mutex::new(Vec::new()),
            active: watch::channel(0).0,
        };

        let mut cold_count = 0usize;
        for (index, blob) in blobs.into_iter().enumerate() {
            if index < capacity {
                match pool.source.parse(&blob).await {
                    Ok(cred) if pool.source.validate(&cred) => pool.admit(cred),
                    Ok(cred) => {
                        warn!(principal = %cred.principal, "warm credential expired, dropping");
                    }
                    Err(error) => {
                        warn!(%error, "failed to activate credential file");
                    }
                }
            } else {
                pool.cold.lock().await.push(blob);
                cold_count += 1;
            }
        }

        debug!(
            active = pool.active_count(),
            cold = cold_count,
            capacity,
            "credential pool initialized"
        );
        Ok(pool)
    }

    /// Pool capacity (the parallel limit).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live credentials: hot plus currently checked out.
    #[must_use]
    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    /// Checks one credential out of the hot queue.
    ///
    /// Tops the pool up from the cold stack first when under capacity, then
    /// blocks until a hot credential is available. Fails fast once the live
    /// count reaches zero, including for acquirers already parked.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoCredentials`] when no live credential remains.
    pub async fn acquire(&self) -> Result<Credential, PoolError> {
        if self.active_count() < self.capacity {
            self.refill().await;
        }

        let mut active_rx = self.active.subscribe();
        loop {
            if *active_rx.borrow_and_update() == 0 {
                return Err(PoolError::NoCredentials);
            }
            tokio::select! {
                permit = self.available.acquire() => {
                    let permit = permit.map_err(|_| PoolError::NoCredentials)?;
                    permit.forget();
                    let cred = self.lock_hot().pop_front();
                    let cred = cred.ok_or(PoolError::NoCredentials)?;
                    debug!(principal = %cred.principal, "credential checked out");
                    return Ok(cred);
                }
                changed = active_rx.changed() => {
                    // Live count moved; loop to re-check for the zero case.
                    if changed.is_err() {
                        return Err(PoolError::NoCredentials);
                    }
                }
            }
        }
    }

    /// Returns a still-good credential to the hot queue.
    pub fn release(&self, cred: Credential) {
        debug!(principal = %cred.principal, "credential returned to pool");
        self.lock_hot().push_back(cred);
        self.available.add_permits(1);
    }

    /// Drops a throttled credential permanently.
    pub fn discard(&self, cred: Credential) {
        self.active
            .send_modify(|active| *active = active.saturating_sub(1));
        warn!(
            principal = %cred.principal,
            remaining = self.active_count(),
            "credential discarded"
        );
    }

    /// Promotes cold blobs until the pool is back at capacity or the stack
    /// is drained. Activation failures are skipped.
    async fn refill(&self) {
        let mut cold = self.cold.lock().await;
        while self.active_count() < self.capacity {
            let Some(blob) = cold.pop() else { break };
            match self.source.parse(&blob).await {
                Ok(cred) if self.source.validate(&cred) => {
                    debug!(principal = %cred.principal, "cold credential promoted");
                    self.admit(cred);
                }
                Ok(cred) => {
                    debug!(principal = %cred.principal, "cold credential already expired");
                }
                Err(error) => {
                    warn!(%error, "failed to activate cold credential");
                }
            }
        }
    }

    /// Adds an activated credential to the hot queue and counts it live.
    fn admit(&self, cred: Credential) {
        self.lock_hot().push_back(cred);
        self.available.add_permits(1);
        self.active.send_modify(|active| *active += 1);
    }

    fn lock_hot(&self) -> std::sync::MutexGuard<'_, VecDeque<Credential>> {
        // Hot-queue operations cannot panic, so poisoning never carries a
        // broken invariant.
        self.hot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    /// Source whose blobs are principal names; `!`-prefixed blobs fail to
    /// parse, `~`-prefixed ones activate already expired.
    struct StubSource;

    #[async_trait]
    impl CredentialSource for StubSource {
        fn enumerate(&self) -> Result<Vec<Vec<u8>>, AuthError> {
            Ok(Vec::new())
        }

        async fn parse(&self, blob: &[u8]) -> Result<Credential, AuthError> {
            let name = String::from_utf8_lossy(blob).to_string();
            if let Some(bad) = name.strip_prefix('!') {
                return Err(AuthError::Malformed(bad.to_owned()));
            }
            let expires_at = if name.starts_with('~') {
                Utc::now() - ChronoDuration::seconds(1)
            } else {
                Utc::now() + ChronoDuration::hours(1)
            };
            Ok(Credential {
                access_token: format!("token-{name}"),
                principal: name,
                expires_at,
            })
        }
    }

    struct ListSource(Vec<&'static str>);

    #[async_trait]
    impl CredentialSource for ListSource {
        fn enumerate(&self) -> Result<Vec<Vec<u8>>, AuthError> {
            Ok(self.0.iter().map(|s| s.as_bytes().to_vec()).collect())
        }

        async fn parse(&self, blob: &[u8]) -> Result<Credential, AuthError> {
            StubSource.parse(blob).await
        }
    }

    async fn pool(names: Vec<&'static str>, capacity: usize) -> CredentialPool {
        CredentialPool::init(Arc::new(ListSource(names)), capacity)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_splits_warm_and_cold() {
        let pool = pool(vec!["a", "b", "c", "d", "e"], 3).await;
        assert_eq!(pool.active_count(), 3);
        assert_eq!(pool.cold.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_init_drops_invalid_warm_candidates() {
        let pool = pool(vec!["a", "!broken", "~stale"], 3).await;
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_release_cycle_keeps_active_stable() {
        let pool = pool(vec!["a", "b"], 2).await;
        let cred = pool.acquire().await.unwrap();
        assert_eq!(pool.active_count(), 2, "checked-out credential stays live");
        pool.release(cred);
        assert_eq!(pool.active_count(), 2);
    }

    #[tokio::test]
    async fn test_discard_promotes_cold_on_next_acquire() {
        // 3 warm, 2 cold. Discard all three warm identities; the next
        // acquires must promote the two cold blobs.
        let pool = pool(vec!["a", "b", "c", "d", "e"], 3).await;
        for _ in 0..3 {
            let cred = pool.acquire().await.unwrap();
            pool.discard(cred);
        }
        assert_eq!(pool.active_count(), 0);

        let cred = pool.acquire().await.unwrap();
        assert_eq!(pool.active_count(), 2, "both cold blobs promoted");
        pool.release(cred);
        let second = pool.acquire().await.unwrap();
        pool.release(second);
    }

    #[tokio::test]
    async fn test_refill_skips_unparseable_cold_blobs() {
        let pool = pool(vec!["a", "!bad", "d"], 1).await;
        let cred = pool.acquire().await.unwrap();
        pool.discard(cred);

        // Cold stack is ["!bad", "d"] consumed newest-first: "d" activates,
        // "!bad" is skipped on a later refill.
        let cred = pool.acquire().await.unwrap();
        assert_eq!(cred.principal, "d");
        pool.discard(cred);

        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_acquire_empty_pool_fails() {
        let pool = pool(vec![], 2).await;
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_blocked_acquire_wakes_on_release() {
        let pool = Arc::new(pool(vec!["only"], 1).await);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };

        // Give the waiter time to park, then hand the credential back.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        pool.release(held);

        let cred = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(cred.principal, "only");
    }

    #[tokio::test]
    async fn test_blocked_acquire_fails_when_last_credential_discarded() {
        let pool = Arc::new(pool(vec!["only"], 1).await);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.discard(held);

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PoolError::NoCredentials)));
    }

    #[tokio::test]
    async fn test_concurrent_checkout_never_shares_a_credential() {
        let pool = Arc::new(pool(vec!["a", "b", "c"], 3).await);
        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                let cred = pool.acquire().await.unwrap();
                let principal = cred.principal.clone();
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(cred);
                principal
            }));
        }

        // Every checkout completes, and the live count is intact: no
        // credential was lost or duplicated by concurrent checkout.
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.active_count(), 3);
        let mut principals: Vec<String> =
            pool.lock_hot().iter().map(|c| c.principal.clone()).collect();
        principals.sort();
        assert_eq!(principals, vec!["a", "b", "c"]);
    }
}
