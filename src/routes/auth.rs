// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google sign-in and logout routes.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::access::resolve_redirect;
use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, with_session_cookies, without_session_cookies};
use crate::models::UserProfile;
use crate::services::{GoogleIdentity, OidcError};
use crate::time_utils::now_rfc3339;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google", post(google_sign_in))
        .route("/auth/logout", post(logout))
}

/// Sign-in request from the browser after Google Identity Services.
#[derive(Deserialize)]
pub struct GoogleSignInRequest {
    id_token: String,
    /// Set when the user ticked the terms/privacy checkbox.
    #[serde(default)]
    accept_terms: bool,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SignInResponse {
    /// Where the client should navigate next.
    pub redirect: String,
    /// True when this sign-in created the profile.
    pub created: bool,
    pub user: UserProfile,
}

/// Verify a Google ID token, provision the profile on first sign-in and
/// start a session.
async fn google_sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<GoogleSignInRequest>,
) -> Result<(CookieJar, Json<SignInResponse>)> {
    let identity = state
        .google_verifier
        .verify(&body.id_token)
        .await
        .map_err(|e| match e {
            OidcError::Rejected(reason) => {
                tracing::warn!(reason = %reason, "Rejected Google ID token");
                AppError::InvalidToken
            }
            OidcError::Transient(reason) => {
                AppError::Internal(anyhow::anyhow!("Google token verification unavailable: {reason}"))
            }
        })?;

    let now = now_rfc3339();
    let (user, created) = provision_profile(&state, &identity, &now, body.accept_terms).await?;

    let token = create_jwt(&user.uid, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;
    let jar = with_session_cookies(jar, token, state.config.secure_cookies());

    let redirect = resolve_redirect(Some(user.role)).path().to_string();

    tracing::info!(
        uid = %user.uid,
        role = user.role.as_str(),
        created,
        redirect = %redirect,
        "User signed in"
    );

    Ok((
        jar,
        Json(SignInResponse {
            redirect,
            created,
            user,
        }),
    ))
}

/// Create the profile if this is the first sign-in, else stamp the login.
///
/// New profiles always get the `user` role and zero credits.
async fn provision_profile(
    state: &AppState,
    identity: &GoogleIdentity,
    now: &str,
    accept_terms: bool,
) -> Result<(UserProfile, bool)> {
    let mut profile =
        UserProfile::new_for_signup(&identity.uid, &identity.email, identity.name.as_deref(), now);
    profile.photo_url = identity.picture.clone();
    if accept_terms {
        profile.agreed_to_terms_at = Some(now.to_string());
        profile.agreed_to_privacy_at = Some(now.to_string());
    }

    if state.store.create_user(&profile).await? {
        tracing::info!(uid = %profile.uid, "Provisioned new user profile");
        return Ok((profile, true));
    }

    let profile = state
        .store
        .record_login(&identity.uid, now, accept_terms)
        .await?;
    Ok((profile, false))
}

/// Logout: drop both session cookies.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, StatusCode) {
    (
        without_session_cookies(jar, state.config.secure_cookies()),
        StatusCode::NO_CONTENT,
    )
}
