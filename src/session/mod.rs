// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-side session core.
//!
//! Front-end shells own one [`SessionStore`] and hand it to the pieces that
//! need it: the [`AuthObserver`] writes to it, the route guard and the
//! [`CreditsWatcher`] read from it.

pub mod credits;
pub mod observer;
pub mod store;
pub mod subscription;

pub use credits::{CreditsFeed, CreditsState, CreditsWatcher, PollingCreditsFeed};
pub use observer::{fetch_profile_with_backoff, AuthIdentity, AuthObserver, FetchOutcome, RetryPolicy};
pub use store::{AuthSession, SessionStore};
pub use subscription::Subscription;
