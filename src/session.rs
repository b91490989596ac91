//! Session Credential Cache
//!
//! Owns the orchestration-manager session token. The token is acquired once,
//! cached with a fixed 8-hour expiry, transparently renewed on expiry, and
//! shared across concurrent requests. Renewal is single-flight: the login
//! call runs while the slot's mutex is held, so concurrent cold callers
//! queue behind the first one and reuse the entry it stores instead of
//! issuing their own login calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ApiError;

/// Fixed session lifetime, matching the orchestration manager's documented
/// token validity. Not derived from the token itself.
pub fn token_ttl() -> Duration {
    Duration::hours(8)
}

/// The one producer of cache entries. Production impl is the Portainer
/// client's login call; tests substitute counting or failing fakes.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<String, ApiError>;
}

#[derive(Debug, Clone)]
struct Entry {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Observable cache state, reported by `/health` and `/api/auth/status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SessionStatus {
    Absent,
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
}

/// Process-wide singleton slot for the session credential.
///
/// Either absent, present-and-unexpired, or present-and-expired; an expired
/// entry is never handed to a caller. Only `token()` writes the slot and only
/// `invalidate()` clears it.
pub struct SessionCache {
    slot: Mutex<Option<Entry>>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::with_ttl(token_ttl())
    }

    /// Custom lifetime, used by tests to force expiry without waiting.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { slot: Mutex::new(None), ttl }
    }

    /// Return a valid token, reusing the cached one when possible.
    ///
    /// Cache hit: no network call. Miss (absent or expired): perform the
    /// login while holding the lock, store the fresh entry, return it. A
    /// failed login leaves the slot untouched and propagates the error, so
    /// the next caller retries.
    pub async fn token(&self, auth: &dyn Authenticator) -> Result<String, ApiError> {
        let mut slot = self.slot.lock().await;
        if let Some(entry) = slot.as_ref() {
            if entry.is_valid(Utc::now()) {
                debug!("session cache hit");
                return Ok(entry.token.clone());
            }
            debug!("session token expired, re-authenticating");
        }

        let token = auth.login().await?;
        let expires_at = Utc::now() + self.ttl;
        info!(%expires_at, "session token renewed");
        *slot = Some(Entry { token: token.clone(), expires_at });
        Ok(token)
    }

    /// Reset the slot to absent. Called when a downstream call reports an
    /// authorization failure and on explicit refresh. Idempotent.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            info!("session token invalidated");
        }
    }

    /// Non-destructive state report.
    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            None => SessionStatus::Absent,
            Some(entry) if entry.is_valid(Utc::now()) => {
                SessionStatus::Valid { expires_at: entry.expires_at }
            }
            Some(entry) => SessionStatus::Expired { expired_at: entry.expires_at },
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Hands out `token-1`, `token-2`, ... and counts login calls.
    struct CountingAuth {
        calls: AtomicUsize,
        delay_ms: u64,
    }

    impl CountingAuth {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), delay_ms: 0 }
        }

        fn slow(delay_ms: u64) -> Self {
            Self { calls: AtomicUsize::new(0), delay_ms }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for CountingAuth {
        async fn login(&self) -> Result<String, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            Ok(format!("token-{n}"))
        }
    }

    struct FailingAuth;

    #[async_trait]
    impl Authenticator for FailingAuth {
        async fn login(&self) -> Result<String, ApiError> {
            Err(ApiError::Authentication("invalid credentials".into()))
        }
    }

    #[tokio::test]
    async fn cached_token_is_reused_without_relogin() {
        let cache = SessionCache::new();
        let auth = CountingAuth::new();

        let first = cache.token(&auth).await.unwrap();
        for _ in 0..5 {
            assert_eq!(cache.token(&auth).await.unwrap(), first);
        }
        assert_eq!(auth.count(), 1);
    }

    #[tokio::test]
    async fn expired_token_triggers_exactly_one_relogin() {
        let cache = SessionCache::with_ttl(Duration::zero());
        let auth = CountingAuth::new();

        let first = cache.token(&auth).await.unwrap();
        let second = cache.token(&auth).await.unwrap();
        assert_eq!(first, "token-1");
        assert_eq!(second, "token-2");
        assert_eq!(auth.count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_relogin_despite_remaining_ttl() {
        let cache = SessionCache::new();
        let auth = CountingAuth::new();

        cache.token(&auth).await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.status().await, SessionStatus::Absent);

        let renewed = cache.token(&auth).await.unwrap();
        assert_eq!(renewed, "token-2");
        assert_eq!(auth.count(), 2);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = SessionCache::new();
        cache.invalidate().await;
        cache.invalidate().await;
        assert_eq!(cache.status().await, SessionStatus::Absent);
    }

    #[tokio::test]
    async fn concurrent_cold_callers_share_a_single_login() {
        let cache = Arc::new(SessionCache::new());
        let auth = Arc::new(CountingAuth::slow(50));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let auth = auth.clone();
            handles.push(tokio::spawn(
                async move { cache.token(auth.as_ref()).await },
            ));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(auth.count(), 1);
        assert!(tokens.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn failed_login_leaves_slot_untouched() {
        let cache = SessionCache::new();

        let err = cache.token(&FailingAuth).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert_eq!(cache.status().await, SessionStatus::Absent);

        // Recoverable: a later caller with working credentials fills the slot.
        let auth = CountingAuth::new();
        assert_eq!(cache.token(&auth).await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn failed_relogin_keeps_the_expired_entry() {
        let cache = SessionCache::with_ttl(Duration::zero());
        let auth = CountingAuth::new();

        cache.token(&auth).await.unwrap();
        let err = cache.token(&FailingAuth).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert!(matches!(cache.status().await, SessionStatus::Expired { .. }));
    }

    #[tokio::test]
    async fn status_reports_valid_with_expiry() {
        let cache = SessionCache::new();
        let auth = CountingAuth::new();
        cache.token(&auth).await.unwrap();

        match cache.status().await {
            SessionStatus::Valid { expires_at } => assert!(expires_at > Utc::now()),
            other => panic!("expected valid session, got {other:?}"),
        }
    }
}
