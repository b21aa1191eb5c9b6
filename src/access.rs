// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Role-based routing.
//!
//! [`resolve_redirect`] maps a user (or none) to the one route they belong
//! on. [`evaluate`] decides what a protected view should do for a given
//! session and path, and [`RouteGuard`] turns those decisions into
//! navigation calls without repeating itself.
//!
//! Two independent rules can send a signed-in user elsewhere:
//! * the route's required role does not match the user's role
//!   ([`role_requirement`]);
//! * the user is on the other role's landing page, e.g. an admin on
//!   `/dashboard` ([`canonical_landing`]).

use std::fmt;

use crate::models::UserRole;
use crate::session::AuthSession;

/// Application routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Dashboard,
    Admin,
    Profile,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Home,
        Route::Login,
        Route::Dashboard,
        Route::Admin,
        Route::Profile,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Dashboard => "/dashboard",
            Route::Admin => "/admin",
            Route::Profile => "/profile",
        }
    }

    /// Route for a path. A trailing slash is ignored.
    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        Self::ALL.into_iter().find(|route| route.path() == trimmed)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Where a user belongs: login when signed out, otherwise their role's
/// landing page.
pub fn resolve_redirect(role: Option<UserRole>) -> Route {
    match role {
        None => Route::Login,
        Some(UserRole::Admin) => Route::Admin,
        Some(UserRole::User) => Route::Dashboard,
    }
}

/// Access check: a route that requires a role only admits that role.
///
/// Returns where to send the user instead, if anywhere.
pub fn role_requirement(required: Option<UserRole>, role: UserRole) -> Option<Route> {
    match required {
        Some(required) if required != role => Some(resolve_redirect(Some(role))),
        _ => None,
    }
}

/// Landing check: a user on the other role's landing page is sent to
/// their own.
pub fn canonical_landing(role: UserRole, current: Option<Route>) -> Option<Route> {
    let home = resolve_redirect(Some(role));
    match current {
        Some(route @ (Route::Dashboard | Route::Admin)) if route != home => Some(home),
        _ => None,
    }
}

/// Guard decision for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// The session is still loading; decide later.
    Initializing,
    Unauthenticated,
    Authorized,
    /// Signed in but on the wrong route. `target` is `None` when the user is
    /// already where they would be sent, so there is nowhere to go.
    Misrouted { target: Option<Route> },
}

/// What a protected view renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    Loading,
    Content,
    Nothing,
}

impl GuardState {
    pub fn render(&self) -> Render {
        match self {
            GuardState::Initializing => Render::Loading,
            GuardState::Authorized => Render::Content,
            GuardState::Unauthenticated | GuardState::Misrouted { .. } => Render::Nothing,
        }
    }

    /// Navigation this state calls for.
    pub fn navigation(&self) -> Option<Route> {
        match self {
            GuardState::Unauthenticated => Some(Route::Login),
            GuardState::Misrouted { target } => *target,
            GuardState::Initializing | GuardState::Authorized => None,
        }
    }
}

/// Evaluate a protected view at `current_path` for `session`.
///
/// The role is taken as delivered by the session.
pub fn evaluate(
    required_role: Option<UserRole>,
    current_path: &str,
    session: &AuthSession,
) -> GuardState {
    if session.is_loading {
        return GuardState::Initializing;
    }

    let Some(role) = session.role() else {
        return GuardState::Unauthenticated;
    };

    let current = Route::from_path(current_path);
    let redirect =
        role_requirement(required_role, role).or_else(|| canonical_landing(role, current));

    match redirect {
        None => GuardState::Authorized,
        Some(target) if Some(target) == current => GuardState::Misrouted { target: None },
        Some(target) => GuardState::Misrouted {
            target: Some(target),
        },
    }
}

/// Router the guard drives.
pub trait Navigator {
    fn navigate(&mut self, route: Route);
}

/// Stateful guard around one protected view.
///
/// Navigation is issued only when the decision changes into one that
/// needs it; re-evaluating unchanged inputs issues nothing.
pub struct RouteGuard<N> {
    required_role: Option<UserRole>,
    navigator: N,
    last_navigation: Option<Route>,
}

impl<N: Navigator> RouteGuard<N> {
    pub fn new(required_role: Option<UserRole>, navigator: N) -> Self {
        Self {
            required_role,
            navigator,
            last_navigation: None,
        }
    }

    /// Re-evaluate after the session or path changed.
    pub fn update(&mut self, session: &AuthSession, current_path: &str) -> Render {
        let state = evaluate(self.required_role, current_path, session);
        let navigation = state.navigation();

        if let Some(route) = navigation {
            if self.last_navigation != Some(route) {
                tracing::debug!(from = current_path, to = %route, ?state, "Route guard navigating");
                self.navigator.navigate(route);
            }
        }
        // Loading keeps the previous decision so a refresh does not re-fire it.
        if state != GuardState::Initializing {
            self.last_navigation = navigation;
        }

        state.render()
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }
}
