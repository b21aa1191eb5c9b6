// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Handle for a long-lived background listener.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns one background listener task.
///
/// Teardown happens exactly once: either through
/// [`unsubscribe`](Self::unsubscribe), which consumes the handle, or when the
/// handle is dropped.
#[must_use = "dropping a Subscription tears the listener down"]
pub struct Subscription {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the listener and wait for it to finish.
    pub async fn unsubscribe(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Session listener panicked");
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
