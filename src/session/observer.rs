// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth-state observation.
//!
//! The auth provider publishes who is signed in on a `watch` channel. The
//! observer turns each event into a session update. A brand-new account's
//! profile is created asynchronously by the backend, so right after sign-in
//! the profile may not exist yet: the fetch is retried with exponential
//! backoff before the session is given up as unauthenticated.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::db::ProfileStore;
use crate::error::AppError;
use crate::models::UserProfile;
use crate::session::{SessionStore, Subscription};

/// Identity reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub uid: String,
    pub email: String,
}

/// Backoff for the post-sign-in profile fetch.
///
/// One initial attempt, then up to `max_retries` more, the n-th retry
/// waiting `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
    }

    /// Total time spent waiting if every attempt comes back empty.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Result of [`fetch_profile_with_backoff`].
#[derive(Debug)]
pub enum FetchOutcome {
    Found(UserProfile),
    /// Still no profile after every attempt.
    NotFound { attempts: u32 },
    /// The store failed; not retried.
    Failed(AppError),
}

/// Fetch a profile, retrying while it does not exist yet.
pub async fn fetch_profile_with_backoff(
    store: &dyn ProfileStore,
    uid: &str,
    policy: RetryPolicy,
) -> FetchOutcome {
    let mut attempt = 0;
    loop {
        match store.get_user(uid).await {
            Ok(Some(profile)) => {
                if attempt > 0 {
                    tracing::debug!(uid, attempt, "Profile appeared after retry");
                }
                return FetchOutcome::Found(profile);
            }
            Ok(None) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    uid,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Profile not found yet, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Ok(None) => {
                return FetchOutcome::NotFound {
                    attempts: attempt + 1,
                }
            }
            Err(e) => return FetchOutcome::Failed(e),
        }
    }
}

/// What ended one round of the observer loop.
enum Step {
    Stop,
    Resolved,
    Superseded,
    ProviderClosed,
}

/// Keeps a [`SessionStore`] in step with the auth provider.
#[derive(Clone)]
pub struct AuthObserver {
    session: SessionStore,
    store: Arc<dyn ProfileStore>,
    policy: RetryPolicy,
}

impl AuthObserver {
    pub fn new(session: SessionStore, store: Arc<dyn ProfileStore>, policy: RetryPolicy) -> Self {
        Self {
            session,
            store,
            policy,
        }
    }

    /// Start observing. The value currently in `events` is handled first.
    ///
    /// Events are handled one at a time; an event arriving while a profile
    /// fetch is still backing off abandons that fetch.
    pub fn spawn(self, events: watch::Receiver<Option<AuthIdentity>>) -> Subscription {
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.run(events, token.clone()));
        Subscription::new(token, handle)
    }

    async fn run(self, mut events: watch::Receiver<Option<AuthIdentity>>, token: CancellationToken) {
        loop {
            let identity = events.borrow_and_update().clone();
            let resolve = self.resolve(identity);
            tokio::pin!(resolve);

            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Stop,
                _ = &mut resolve => Step::Resolved,
                changed = events.changed() => match changed {
                    Ok(()) => Step::Superseded,
                    Err(_) => Step::ProviderClosed,
                },
            };

            match step {
                Step::Stop => break,
                Step::Resolved => {}
                Step::Superseded => {
                    tracing::debug!("Auth state changed during profile fetch, restarting");
                    continue;
                }
                Step::ProviderClosed => {
                    // Nothing can supersede this event now; let it settle.
                    tracing::debug!("Auth provider closed, finishing pending profile fetch");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = &mut resolve => {}
                    }
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Auth observer stopped");
    }

    async fn resolve(&self, identity: Option<AuthIdentity>) {
        let Some(identity) = identity else {
            self.session.clear_auth();
            return;
        };

        self.session.set_loading(true);

        match fetch_profile_with_backoff(self.store.as_ref(), &identity.uid, self.policy).await {
            FetchOutcome::Found(profile) => {
                tracing::info!(uid = %profile.uid, role = profile.role.as_str(), "Session resolved");
                self.session.set_user(Some(profile));
            }
            FetchOutcome::NotFound { attempts } => {
                tracing::warn!(
                    uid = %identity.uid,
                    attempts,
                    "Profile never appeared, treating session as signed out"
                );
                self.session.clear_auth();
            }
            FetchOutcome::Failed(e) => {
                tracing::warn!(uid = %identity.uid, error = %e, "Profile fetch failed");
                self.session.clear_auth();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::UserRole;
    use crate::session::AuthSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const NOW: &str = "2026-01-01T00:00:00Z";

    fn profile(uid: &str, role: UserRole) -> UserProfile {
        let mut profile = UserProfile::new_for_signup(uid, &format!("{uid}@example.com"), None, NOW);
        profile.role = role;
        profile
    }

    fn identity(uid: &str) -> Option<AuthIdentity> {
        Some(AuthIdentity {
            uid: uid.to_string(),
            email: format!("{uid}@example.com"),
        })
    }

    /// Store that counts reads and can be told to fail.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ProfileStore for CountingStore {
        async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::Database("unavailable".to_string()));
            }
            self.inner.get_user(uid).await
        }

        async fn create_user(&self, profile: &UserProfile) -> Result<bool, AppError> {
            self.inner.create_user(profile).await
        }

        async fn patch_user(
            &self,
            profile: &UserProfile,
            fields: Vec<String>,
        ) -> Result<UserProfile, AppError> {
            self.inner.patch_user(profile, fields).await
        }
    }

    async fn settled(rx: &mut watch::Receiver<AuthSession>) -> AuthSession {
        rx.wait_for(|session| !session.is_loading)
            .await
            .unwrap()
            .clone()
    }

    #[test]
    fn default_policy_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..policy.max_retries)
            .map(|n| policy.delay_for(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.total_delay(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_gives_up_after_all_attempts() {
        let store = CountingStore::default();
        let start = Instant::now();

        let outcome = fetch_profile_with_backoff(&store, "ghost", RetryPolicy::default()).await;

        assert!(matches!(outcome, FetchOutcome::NotFound { attempts: 6 }));
        assert_eq!(store.reads.load(Ordering::SeqCst), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn store_errors_are_not_retried() {
        let store = CountingStore {
            fail: true,
            ..CountingStore::default()
        };

        let outcome = fetch_profile_with_backoff(&store, "u1", RetryPolicy::default()).await;

        assert!(matches!(outcome, FetchOutcome::Failed(AppError::Database(_))));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_resolves_existing_profile() {
        let store = Arc::new(MemoryStore::new());
        store.seed(profile("u1", UserRole::Admin)).await;
        let session = SessionStore::new();
        let (_tx, rx) = watch::channel(identity("u1"));

        let _sub = AuthObserver::new(session.clone(), store, RetryPolicy::default()).spawn(rx);

        let resolved = settled(&mut session.subscribe()).await;
        assert_eq!(resolved.role(), Some(UserRole::Admin));
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_profile_is_picked_up_by_retry() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionStore::new();
        let (_tx, rx) = watch::channel(identity("u1"));
        let start = Instant::now();

        let _sub = AuthObserver::new(session.clone(), store.clone(), RetryPolicy::default())
            .spawn(rx);

        // Attempts run at t = 0, 1, 3, 7, ...
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(session.snapshot().is_loading);
        store.seed(profile("u1", UserRole::User)).await;

        let resolved = settled(&mut session.subscribe()).await;
        assert_eq!(resolved.uid(), Some("u1"));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_profile_ends_signed_out() {
        let session = SessionStore::new();
        let (_tx, rx) = watch::channel(identity("ghost"));
        let start = Instant::now();

        let _sub = AuthObserver::new(
            session.clone(),
            Arc::new(MemoryStore::new()),
            RetryPolicy::default(),
        )
        .spawn(rx);

        let resolved = settled(&mut session.subscribe()).await;
        assert_eq!(resolved, AuthSession::signed_out());
        assert_eq!(start.elapsed(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_clears_session() {
        let store = Arc::new(MemoryStore::new());
        store.seed(profile("u1", UserRole::User)).await;
        let session = SessionStore::new();
        let (tx, rx) = watch::channel(identity("u1"));
        let mut session_rx = session.subscribe();

        let _sub = AuthObserver::new(session.clone(), store, RetryPolicy::default()).spawn(rx);
        settled(&mut session_rx).await;

        tx.send(None).unwrap();
        session_rx
            .wait_for(|session| session.current_user.is_none())
            .await
            .unwrap();
        assert!(!session.snapshot().is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn new_event_abandons_backoff() {
        let store = Arc::new(MemoryStore::new());
        store.seed(profile("u2", UserRole::User)).await;
        let session = SessionStore::new();
        let (tx, rx) = watch::channel(identity("ghost"));
        let start = Instant::now();

        let _sub = AuthObserver::new(session.clone(), store, RetryPolicy::default()).spawn(rx);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(identity("u2")).unwrap();

        let resolved = settled(&mut session.subscribe()).await;
        assert_eq!(resolved.uid(), Some("u2"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_updates() {
        let store = Arc::new(MemoryStore::new());
        store.seed(profile("u1", UserRole::User)).await;
        let session = SessionStore::new();
        let (tx, rx) = watch::channel(None);

        let sub = AuthObserver::new(session.clone(), store, RetryPolicy::default()).spawn(rx);
        settled(&mut session.subscribe()).await;
        sub.unsubscribe().await;

        tx.send_replace(identity("u1"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.snapshot().current_user.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_provider_still_settles_session() {
        let session = SessionStore::new();
        let (tx, rx) = watch::channel(identity("ghost"));
        drop(tx);

        let _sub = AuthObserver::new(
            session.clone(),
            Arc::new(MemoryStore::new()),
            RetryPolicy::default(),
        )
        .spawn(rx);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(session.snapshot(), AuthSession::signed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_provider_keeps_lagging_profile() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionStore::new();
        let (tx, rx) = watch::channel(identity("u1"));

        let _sub = AuthObserver::new(session.clone(), store.clone(), RetryPolicy::default())
            .spawn(rx);

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(tx);
        store.seed(profile("u1", UserRole::User)).await;

        let resolved = settled(&mut session.subscribe()).await;
        assert_eq!(resolved.uid(), Some("u1"));
    }
}
