// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The reactive auth session.

use std::sync::Arc;
use tokio::sync::watch;

use crate::models::{UserProfile, UserRole};

/// Who is signed in, and whether that is still being worked out.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub current_user: Option<UserProfile>,
    pub is_loading: bool,
}

impl Default for AuthSession {
    /// Sessions start out loading with no user.
    fn default() -> Self {
        Self {
            current_user: None,
            is_loading: true,
        }
    }
}

impl AuthSession {
    pub fn signed_in(profile: UserProfile) -> Self {
        Self {
            current_user: Some(profile),
            is_loading: false,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            current_user: None,
            is_loading: false,
        }
    }

    pub fn role(&self) -> Option<UserRole> {
        self.current_user.as_ref().map(|user| user.role)
    }

    pub fn uid(&self) -> Option<&str> {
        self.current_user.as_ref().map(|user| user.uid.as_str())
    }
}

/// Owner of the single [`AuthSession`] of a client.
///
/// Cloning shares the same session. The setters are the only way to change
/// it; readers either take a [`snapshot`](Self::snapshot) or
/// [`subscribe`](Self::subscribe) to changes.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<AuthSession>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AuthSession::default());
        Self { tx: Arc::new(tx) }
    }

    /// Set the signed-in user (or none). Always ends loading.
    pub fn set_user(&self, user: Option<UserProfile>) {
        let next = AuthSession {
            current_user: user,
            is_loading: false,
        };
        self.tx.send_if_modified(|session| {
            if *session == next {
                return false;
            }
            *session = next;
            true
        });
    }

    pub fn set_loading(&self, is_loading: bool) {
        self.tx.send_if_modified(|session| {
            let changed = session.is_loading != is_loading;
            session.is_loading = is_loading;
            changed
        });
    }

    /// Sign-out or unresolvable profile.
    pub fn clear_auth(&self) {
        self.set_user(None);
    }

    pub fn snapshot(&self) -> AuthSession {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: UserRole) -> UserProfile {
        let mut profile =
            UserProfile::new_for_signup("u1", "u1@example.com", None, "2026-01-01T00:00:00Z");
        profile.role = role;
        profile
    }

    #[test]
    fn starts_loading_without_user() {
        let session = SessionStore::new().snapshot();
        assert!(session.is_loading);
        assert!(session.current_user.is_none());
    }

    #[test]
    fn lifecycle_transitions() {
        let store = SessionStore::new();

        store.set_user(Some(profile(UserRole::Admin)));
        let session = store.snapshot();
        assert!(!session.is_loading);
        assert_eq!(session.role(), Some(UserRole::Admin));
        assert_eq!(session.uid(), Some("u1"));

        store.set_loading(true);
        assert!(store.snapshot().is_loading);
        assert!(store.snapshot().current_user.is_some());

        store.clear_auth();
        assert_eq!(store.snapshot(), AuthSession::signed_out());
    }

    #[tokio::test]
    async fn subscribers_see_changes_only() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();

        store.set_loading(true);
        assert!(!rx.has_changed().unwrap());

        store.set_user(Some(profile(UserRole::User)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().role(), Some(UserRole::User));

        store.set_user(Some(profile(UserRole::User)));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn clones_share_the_session() {
        let store = SessionStore::new();
        let other = store.clone();
        other.clear_auth();
        assert!(!store.snapshot().is_loading);
    }
}
