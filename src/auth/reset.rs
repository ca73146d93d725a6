//! Password-reset tokens.
//!
//! A token is 32 bytes from the OS RNG, unpadded URL-safe base64, and lives for
//! the configured TTL (15 minutes by default). Entries are keyed by email, so
//! requesting a new token replaces the previous one. Expiry is enforced when a
//! token is validated; [`spawn_sweeper`] additionally purges stale entries in
//! the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResetError {
    #[error("reset token expired")]
    Expired,
    #[error("reset token not found")]
    NotFound,
}

#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Records a fresh token for `email`, replacing any earlier one.
    async fn issue(&self, email: &str) -> String;

    /// Resolves a token to its email without consuming it. An expired match
    /// is removed.
    async fn validate(&self, token: &str) -> Result<String, ResetError>;

    /// Reserves a token for a password change. A claimed token still
    /// validates but cannot be claimed again until it is released, so only
    /// one completion can run per token.
    async fn claim(&self, token: &str) -> Result<String, ResetError>;

    /// Returns a claimed token to the pool after a failed completion.
    async fn release(&self, email: &str, token: &str);

    /// Removes the token after a successful password change. A newer token
    /// issued for the same email in the meantime is left alone.
    async fn consume(&self, email: &str, token: &str);

    /// Removes a token that was never delivered, under the same rule as
    /// [`ResetTokenStore::consume`].
    async fn discard(&self, email: &str, token: &str);

    /// Removes every expired entry, returning how many were dropped.
    async fn sweep_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct ResetEntry {
    token: String,
    expires_at: OffsetDateTime,
    claimed: bool,
}

pub struct MemoryResetStore {
    entries: Mutex<HashMap<String, ResetEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryResetStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    // Every critical section is a plain map operation, so a poisoned lock
    // still guards a consistent map.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, ResetEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drops the entry for `email` only while it still holds `token`.
    fn remove_if_current(&self, email: &str, token: &str) {
        let mut entries = self.entries();
        if entries.get(email).is_some_and(|e| e.token == token) {
            entries.remove(email);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[async_trait]
impl ResetTokenStore for MemoryResetStore {
    async fn issue(&self, email: &str) -> String {
        let token = generate_secure_token();
        let entry = ResetEntry {
            token: token.clone(),
            expires_at: self.clock.now() + self.ttl,
            claimed: false,
        };
        self.entries().insert(email.to_string(), entry);
        token
    }

    async fn validate(&self, token: &str) -> Result<String, ResetError> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let (email, expires_at) = entries
            .iter()
            .find(|(_, e)| e.token == token)
            .map(|(email, e)| (email.clone(), e.expires_at))
            .ok_or(ResetError::NotFound)?;

        if now >= expires_at {
            entries.remove(&email);
            return Err(ResetError::Expired);
        }
        Ok(email)
    }

    async fn claim(&self, token: &str) -> Result<String, ResetError> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let (email, entry) = entries
            .iter_mut()
            .find(|(_, e)| e.token == token)
            .ok_or(ResetError::NotFound)?;

        if now >= entry.expires_at {
            let email = email.clone();
            entries.remove(&email);
            return Err(ResetError::Expired);
        }
        if entry.claimed {
            return Err(ResetError::NotFound);
        }
        entry.claimed = true;
        Ok(email.clone())
    }

    async fn release(&self, email: &str, token: &str) {
        if let Some(entry) = self.entries().get_mut(email) {
            if entry.token == token {
                entry.claimed = false;
            }
        }
    }

    async fn consume(&self, email: &str, token: &str) {
        self.remove_if_current(email, token);
    }

    async fn discard(&self, email: &str, token: &str) {
        self.remove_if_current(email, token);
    }

    async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }
}

/// 256 bits from the OS RNG, unpadded URL-safe base64.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Periodically drops expired reset tokens until `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<dyn ResetTokenStore>,
    interval: StdDuration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(?interval, "reset token sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = cancel.cancelled() => {
                    tracing::info!("reset token sweeper shutting down");
                    return;
                }
            }

            let removed = store.sweep_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "expired reset tokens purged");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn store() -> (Arc<MemoryResetStore>, MockClock) {
        let clock = MockClock::new();
        let store = MemoryResetStore::new(Duration::minutes(15), Arc::new(clock.clone()));
        (Arc::new(store), clock)
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = generate_secure_token();
        let b = generate_secure_token();
        assert_ne!(a, b);
        // 32 bytes -> 43 chars, no padding.
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
        assert_eq!(Base64UrlUnpadded::decode_vec(&a).unwrap().len(), TOKEN_BYTES);
    }

    #[tokio::test]
    async fn token_valid_until_fifteen_minutes() {
        let (store, clock) = store();
        let token = store.issue("alice@x.com").await;

        clock.advance(Duration::minutes(14));
        assert_eq!(store.validate(&token).await.unwrap(), "alice@x.com");

        clock.advance(Duration::minutes(1) + Duration::seconds(1));
        assert_eq!(store.validate(&token).await, Err(ResetError::Expired));
        // Expired entry was purged on the way out.
        assert_eq!(store.validate(&token).await, Err(ResetError::NotFound));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let (store, _) = store();
        store.issue("alice@x.com").await;
        assert_eq!(
            store.validate(&generate_secure_token()).await,
            Err(ResetError::NotFound)
        );
    }

    #[tokio::test]
    async fn validate_does_not_consume() {
        let (store, _) = store();
        let token = store.issue("alice@x.com").await;
        assert!(store.validate(&token).await.is_ok());
        assert!(store.validate(&token).await.is_ok());

        store.consume("alice@x.com", &token).await;
        assert_eq!(store.validate(&token).await, Err(ResetError::NotFound));
    }

    #[tokio::test]
    async fn stale_token_does_not_remove_newer_one() {
        let (store, _) = store();
        let stale = store.issue("alice@x.com").await;
        let fresh = store.issue("alice@x.com").await;

        store.discard("alice@x.com", &stale).await;
        store.consume("alice@x.com", &stale).await;
        assert_eq!(store.validate(&fresh).await.unwrap(), "alice@x.com");

        store.discard("alice@x.com", &fresh).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn claimed_token_cannot_be_claimed_twice() {
        let (store, _) = store();
        let token = store.issue("alice@x.com").await;

        assert_eq!(store.claim(&token).await.unwrap(), "alice@x.com");
        assert_eq!(store.claim(&token).await, Err(ResetError::NotFound));
        // Still resolvable for the reset page while the change is in flight.
        assert_eq!(store.validate(&token).await.unwrap(), "alice@x.com");

        store.release("alice@x.com", &token).await;
        assert_eq!(store.claim(&token).await.unwrap(), "alice@x.com");
        store.consume("alice@x.com", &token).await;
        assert_eq!(store.claim(&token).await, Err(ResetError::NotFound));
    }

    #[tokio::test]
    async fn expired_token_cannot_be_claimed() {
        let (store, clock) = store();
        let token = store.issue("alice@x.com").await;
        clock.advance(Duration::minutes(15));
        assert_eq!(store.claim(&token).await, Err(ResetError::Expired));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn release_ignores_replaced_token() {
        let (store, _) = store();
        let old = store.issue("alice@x.com").await;
        store.claim(&old).await.unwrap();
        let new = store.issue("alice@x.com").await;
        store.claim(&new).await.unwrap();

        store.release("alice@x.com", &old).await;
        assert_eq!(store.claim(&new).await, Err(ResetError::NotFound));
    }

    #[tokio::test]
    async fn newer_token_replaces_older_one() {
        let (store, _) = store();
        let first = store.issue("alice@x.com").await;
        let second = store.issue("alice@x.com").await;
        assert_eq!(store.validate(&first).await, Err(ResetError::NotFound));
        assert_eq!(store.validate(&second).await.unwrap(), "alice@x.com");
    }

    #[tokio::test]
    async fn discard_removes_only_that_email() {
        let (store, _) = store();
        let alice = store.issue("alice@x.com").await;
        let bob = store.issue("bob@x.com").await;
        store.discard("alice@x.com", &alice).await;
        assert_eq!(store.validate(&alice).await, Err(ResetError::NotFound));
        assert_eq!(store.validate(&bob).await.unwrap(), "bob@x.com");
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_entries() {
        let (store, clock) = store();
        store.issue("old@x.com").await;
        clock.advance(Duration::minutes(10));
        let fresh = store.issue("fresh@x.com").await;
        clock.advance(Duration::minutes(6));

        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.validate(&fresh).await.unwrap(), "fresh@x.com");
    }

    #[tokio::test]
    async fn sweeper_purges_in_background_and_stops() {
        let (store, clock) = store();
        store.issue("old@x.com").await;
        clock.advance(Duration::minutes(20));

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone() as Arc<dyn ResetTokenStore>,
            StdDuration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(store.len(), 0);

        cancel.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("sweeper stops on cancel")
            .unwrap();
    }
}
