//! Named mutual exclusion scoped by holder identifier.
//!
//! A lock is taken on a string key by an identifier. The same identifier may
//! take the same key again (the hold is counted), any other identifier waits
//! until the key is released, the current hold expires, or its own waiting
//! budget runs out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Lock helper errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock {key} is not held by {identifier}")]
    LockNotOwned { key: String, identifier: String },
    #[error("timed out after {waited:?} waiting for lock {key}")]
    WaitTimeout { key: String, waited: Duration },
}

/// Per-call options. Unset fields fall back to the manager defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockOptions {
    pub identifier: Option<String>,
    pub waiting: Option<Duration>,
    pub holding: Option<Duration>,
}

impl LockOptions {
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_waiting(mut self, waiting: Duration) -> Self {
        self.waiting = Some(waiting);
        self
    }

    pub fn with_holding(mut self, holding: Duration) -> Self {
        self.holding = Some(holding);
        self
    }
}

/// Defaults applied when [`LockOptions`] leaves a budget unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDefaults {
    pub waiting: Duration,
    /// `None` means holds never expire on their own.
    pub holding: Option<Duration>,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self {
            waiting: Duration::from_secs(30),
            holding: None,
        }
    }
}

#[derive(Debug)]
struct Holder {
    identifier: String,
    count: u32,
    expires_at: Option<Instant>,
}

impl Holder {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    held: Mutex<HashMap<String, Holder>>,
    released: Notify,
}

/// Lock manager, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LockManager {
    inner: Arc<Inner>,
    defaults: LockDefaults,
}

enum Attempt {
    Acquired,
    Busy { expires_at: Option<Instant> },
}

impl LockManager {
    pub fn new(defaults: LockDefaults) -> Self {
        Self {
            inner: Arc::default(),
            defaults,
        }
    }

    pub fn defaults(&self) -> LockDefaults {
        self.defaults
    }

    /// Take `key`, waiting up to the waiting budget. Returns the identifier
    /// holding the lock, generated when the options carry none.
    pub async fn lock(&self, key: &str, options: LockOptions) -> Result<String, LockError> {
        let identifier = options
            .identifier
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let waiting = options.waiting.unwrap_or(self.defaults.waiting);
        let holding = options.holding.or(self.defaults.holding);

        let start = Instant::now();
        let deadline = start + waiting;

        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let now = Instant::now();
            match self.try_take(key, &identifier, holding, now) {
                Attempt::Acquired => return Ok(identifier),
                Attempt::Busy { expires_at } => {
                    if now >= deadline {
                        debug!(%key, %identifier, ?waiting, "lock wait timed out");
                        return Err(LockError::WaitTimeout {
                            key: key.to_owned(),
                            waited: now.duration_since(start),
                        });
                    }
                    let wake_at = expires_at.map_or(deadline, |at| at.min(deadline));
                    trace!(%key, %identifier, "waiting for lock");
                    tokio::select! {
                        _ = released => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
            }
        }
    }

    /// Take `key` without waiting.
    pub fn try_lock(&self, key: &str, options: LockOptions) -> Result<String, LockError> {
        let identifier = options
            .identifier
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let holding = options.holding.or(self.defaults.holding);
        match self.try_take(key, &identifier, holding, Instant::now()) {
            Attempt::Acquired => Ok(identifier),
            Attempt::Busy { .. } => Err(LockError::WaitTimeout {
                key: key.to_owned(),
                waited: Duration::ZERO,
            }),
        }
    }

    fn try_take(
        &self,
        key: &str,
        identifier: &str,
        holding: Option<Duration>,
        now: Instant,
    ) -> Attempt {
        let expires_at = holding.map(|h| now + h);
        let mut held = self.inner.held.lock();
        match held.get_mut(key) {
            Some(holder) if holder.expired(now) => {
                debug!(%key, previous = %holder.identifier, "lock hold expired");
                *holder = Holder {
                    identifier: identifier.to_owned(),
                    count: 1,
                    expires_at,
                };
                Attempt::Acquired
            }
            Some(holder) if holder.identifier == identifier => {
                holder.count += 1;
                holder.expires_at = expires_at;
                trace!(%key, %identifier, count = holder.count, "lock re-entered");
                Attempt::Acquired
            }
            Some(holder) => Attempt::Busy {
                expires_at: holder.expires_at,
            },
            None => {
                held.insert(
                    key.to_owned(),
                    Holder {
                        identifier: identifier.to_owned(),
                        count: 1,
                        expires_at,
                    },
                );
                trace!(%key, %identifier, "lock taken");
                Attempt::Acquired
            }
        }
    }

    /// Release one hold of `key` by `identifier`.
    pub fn unlock(&self, key: &str, identifier: &str) -> Result<(), LockError> {
        let now = Instant::now();
        let mut held = self.inner.held.lock();
        let not_owned = || LockError::LockNotOwned {
            key: key.to_owned(),
            identifier: identifier.to_owned(),
        };

        let holder = held.get_mut(key).ok_or_else(not_owned)?;
        if holder.identifier != identifier || holder.expired(now) {
            return Err(not_owned());
        }

        holder.count -= 1;
        if holder.count == 0 {
            held.remove(key);
            drop(held);
            trace!(%key, %identifier, "lock released");
            self.inner.released.notify_waiters();
        }
        Ok(())
    }

    /// Take `key` and release it when the returned guard drops.
    pub async fn acquire(&self, key: &str, options: LockOptions) -> Result<LockGuard, LockError> {
        let identifier = self.lock(key, options).await?;
        Ok(LockGuard {
            manager: self.clone(),
            key: key.to_owned(),
            identifier,
        })
    }

    /// Take every key in `keys` in sorted order under one identifier.
    pub async fn acquire_all<I, K>(&self, keys: I, options: LockOptions) -> Result<Vec<LockGuard>, LockError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let options = LockOptions {
            identifier: Some(identifier),
            ..options
        };

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            // Guards taken so far release on early return.
            guards.push(self.acquire(&key, options.clone()).await?);
        }
        Ok(guards)
    }

    /// Returns the current holder of `key`, if held and not expired.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.inner
            .held
            .lock()
            .get(key)
            .filter(|h| !h.expired(now))
            .map(|h| h.identifier.clone())
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.holder(key).is_some()
    }
}

/// RAII hold on a key; releases one hold on drop.
#[derive(Debug)]
#[must_use = "the lock is released when the guard is dropped"]
pub struct LockGuard {
    manager: LockManager,
    key: String,
    identifier: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // An expired hold was already taken over; nothing to release.
        if let Err(err) = self.manager.unlock(&self.key, &self.identifier) {
            trace!(%err, "lock guard released an expired hold");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn opts(id: &str) -> LockOptions {
        LockOptions::default().with_identifier(id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_for_same_identifier() {
        let locks = LockManager::default();
        locks.lock("k", opts("a")).await.unwrap();
        locks.lock("k", opts("a")).await.unwrap();

        locks.unlock("k", "a").unwrap();
        assert_eq!(locks.holder("k").as_deref(), Some("a"));
        locks.unlock("k", "a").unwrap();
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_with_wrong_identifier() {
        let locks = LockManager::default();
        locks.lock("k", opts("a")).await.unwrap();
        assert_matches!(locks.unlock("k", "b"), Err(LockError::LockNotOwned { .. }));
        assert_matches!(locks.unlock("other", "a"), Err(LockError::LockNotOwned { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout() {
        let locks = LockManager::default();
        locks.lock("k", opts("a")).await.unwrap();

        let err = locks
            .lock("k", opts("b").with_waiting(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert_matches!(err, LockError::WaitTimeout { waited, .. } if waited >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let locks = LockManager::default();
        locks.lock("k", opts("a")).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock("k", opts("b")).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        locks.unlock("k", "a").unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), "b");
        assert_eq!(locks.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_holding_budget_expires() {
        let locks = LockManager::default();
        locks
            .lock("k", opts("a").with_holding(Duration::from_secs(5)))
            .await
            .unwrap();

        let started = Instant::now();
        locks
            .lock("k", opts("b").with_waiting(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_matches!(locks.unlock("k", "a"), Err(LockError::LockNotOwned { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_releases_on_drop() {
        let locks = LockManager::default();
        {
            let guard = locks.acquire("k", LockOptions::default()).await.unwrap();
            assert_eq!(locks.holder("k").as_deref(), Some(guard.identifier()));
        }
        assert!(!locks.is_locked("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_all_sorted_and_deduped() {
        let locks = LockManager::default();
        let guards = locks
            .acquire_all(["net/b", "net/a", "net/b"], LockOptions::default())
            .await
            .unwrap();
        let keys: Vec<_> = guards.iter().map(LockGuard::key).collect();
        assert_eq!(keys, ["net/a", "net/b"]);
        drop(guards);
        assert!(!locks.is_locked("net/a"));
    }
}
