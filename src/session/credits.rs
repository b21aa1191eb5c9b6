// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live credit balance for the signed-in user.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::ProfileStore;
use crate::models::Credits;
use crate::session::{AuthSession, SessionStore, Subscription};

/// A balance update, or a message describing why none could be read.
pub type CreditsUpdate = Result<Credits, String>;

/// Source of live balance updates for one user.
#[async_trait]
pub trait CreditsFeed: Send + Sync {
    /// Push updates for `uid` into `updates` until `cancel` fires.
    async fn watch(
        &self,
        uid: String,
        updates: mpsc::Sender<CreditsUpdate>,
        cancel: CancellationToken,
    );
}

/// Feed that polls the profile store and reports changes.
pub struct PollingCreditsFeed {
    store: Arc<dyn ProfileStore>,
    interval: Duration,
}

impl PollingCreditsFeed {
    pub fn new(store: Arc<dyn ProfileStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl CreditsFeed for PollingCreditsFeed {
    async fn watch(
        &self,
        uid: String,
        updates: mpsc::Sender<CreditsUpdate>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last: Option<CreditsUpdate> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let update = self
                .store
                .get_credits(&uid)
                .await
                .map_err(|e| e.to_string());

            if last.as_ref() == Some(&update) {
                continue;
            }
            last = Some(update.clone());

            if updates.send(update).await.is_err() {
                return;
            }
        }
    }
}

/// What the UI shows for the balance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreditsState {
    pub credits: Option<Credits>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl CreditsState {
    fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }

    /// Balance is known and every counter is zero.
    pub fn no_credits(&self) -> bool {
        self.credits.is_some_and(|credits| credits.is_empty())
    }
}

enum Event {
    Stop,
    SessionChanged,
    Update(Option<CreditsUpdate>),
}

struct ActiveFeed {
    uid: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    updates: mpsc::Receiver<CreditsUpdate>,
}

impl ActiveFeed {
    fn start(feed: &Arc<dyn CreditsFeed>, uid: &str) -> Self {
        let (tx, updates) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task_feed = feed.clone();
        let task_uid = uid.to_string();
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { task_feed.watch(task_uid, tx, task_cancel).await });

        tracing::debug!(uid, "Credits subscription started");
        Self {
            uid: uid.to_string(),
            cancel,
            handle,
            updates,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(uid = %self.uid, error = %e, "Credits feed panicked");
            }
        }
        tracing::debug!(uid = %self.uid, "Credits subscription stopped");
    }
}

/// Follows the session's user and keeps one feed subscription for them.
pub struct CreditsWatcher {
    state: watch::Receiver<CreditsState>,
    subscription: Subscription,
}

impl CreditsWatcher {
    pub fn spawn(session: &SessionStore, feed: Arc<dyn CreditsFeed>) -> Self {
        let (tx, state) = watch::channel(CreditsState::default());
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(session.subscribe(), feed, tx, token.clone()));

        Self {
            state,
            subscription: Subscription::new(token, handle),
        }
    }

    pub fn state(&self) -> CreditsState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CreditsState> {
        self.state.clone()
    }

    /// Stop following the session; the active feed is torn down first.
    pub async fn unsubscribe(self) {
        self.subscription.unsubscribe().await;
    }
}

async fn run(
    mut session: watch::Receiver<AuthSession>,
    feed: Arc<dyn CreditsFeed>,
    state: watch::Sender<CreditsState>,
    token: CancellationToken,
) {
    let mut active: Option<ActiveFeed> = None;

    loop {
        let uid = session.borrow_and_update().uid().map(str::to_string);

        if active.as_ref().map(|a| &a.uid) != uid.as_ref() {
            if let Some(previous) = active.take() {
                previous.stop().await;
            }
            match uid {
                Some(uid) => {
                    state.send_replace(CreditsState::loading());
                    active = Some(ActiveFeed::start(&feed, &uid));
                }
                None => {
                    state.send_replace(CreditsState::default());
                }
            }
        }

        let next_update = async {
            match active.as_mut() {
                Some(feed) => feed.updates.recv().await,
                None => std::future::pending().await,
            }
        };

        let event = tokio::select! {
            biased;
            _ = token.cancelled() => Event::Stop,
            changed = session.changed() => match changed {
                Ok(()) => Event::SessionChanged,
                Err(_) => Event::Stop,
            },
            update = next_update => Event::Update(update),
        };

        match event {
            Event::Stop => break,
            Event::SessionChanged => {}
            Event::Update(Some(Ok(credits))) => {
                state.send_replace(CreditsState {
                    credits: Some(credits),
                    is_loading: false,
                    error: None,
                });
            }
            Event::Update(Some(Err(error))) => {
                tracing::warn!(error = %error, "Credits update failed");
                state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(error);
                });
            }
            Event::Update(None) => {
                // Feed ended on its own; wait for the next identity change.
                if let Some(ended) = active.take() {
                    tracing::debug!(uid = %ended.uid, "Credits feed ended");
                    ended.stop().await;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Some(feed) = active.take() {
        feed.stop().await;
    }
}
