// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Server-side route guard for the application pages.
//!
//! Each page either redirects (307) to where the session belongs or
//! answers with a small JSON page model for the front end to render.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::access::{evaluate, resolve_redirect, Render, Route};
use crate::middleware::auth::session_from_request;
use crate::models::{UserProfile, UserRole};
use crate::session::AuthSession;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login))
        .route("/dashboard", get(dashboard))
        .route("/admin", get(admin))
        .route("/profile", get(profile))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PageResponse {
    pub page: String,
    pub user: Option<UserProfile>,
    /// Whether the "buy credits" prompt should show.
    pub no_credits: bool,
}

impl PageResponse {
    fn new(route: Route, user: Option<UserProfile>) -> Self {
        let no_credits = user.as_ref().is_some_and(|u| u.credits.is_empty());
        Self {
            page: route.path().to_string(),
            user,
            no_credits,
        }
    }
}

/// Apply the route guard to a resolved session.
fn guarded(required_role: Option<UserRole>, route: Route, session: AuthSession) -> Response {
    let state = evaluate(required_role, route.path(), &session);

    match (state.render(), state.navigation()) {
        (Render::Content, _) => Json(PageResponse::new(route, session.current_user)).into_response(),
        (_, Some(target)) => {
            tracing::debug!(page = %route, target = %target, "Page guard redirect");
            Redirect::temporary(target.path()).into_response()
        }
        (_, None) => StatusCode::FORBIDDEN.into_response(),
    }
}

/// `/` sends everyone to where they belong.
async fn home(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Redirect {
    let session = session_from_request(&state, &jar, &headers).await;
    Redirect::temporary(resolve_redirect(session.role()).path())
}

/// Signed-in users skip the login page.
async fn login(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Response {
    let session = session_from_request(&state, &jar, &headers).await;
    match session.role() {
        Some(role) => Redirect::temporary(resolve_redirect(Some(role)).path()).into_response(),
        None => Json(PageResponse::new(Route::Login, None)).into_response(),
    }
}

async fn dashboard(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let session = session_from_request(&state, &jar, &headers).await;
    guarded(None, Route::Dashboard, session)
}

async fn admin(State(state): State<Arc<AppState>>, jar: CookieJar, headers: HeaderMap) -> Response {
    let session = session_from_request(&state, &jar, &headers).await;
    guarded(Some(UserRole::Admin), Route::Admin, session)
}

async fn profile(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let session = session_from_request(&state, &jar, &headers).await;
    guarded(None, Route::Profile, session)
}
