// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! JWT session authentication middleware.
//!
//! After Google sign-in the server issues its own HS256 session token. It is
//! read from the `astro_token` cookie, or from an `Authorization: Bearer`
//! header for non-browser clients.

use crate::error::AppError;
use crate::models::UserProfile;
use crate::session::AuthSession;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// HttpOnly cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "astro_token";
/// Script-readable hint that a session cookie exists.
pub const LOGGED_IN_COOKIE: &str = "astro_logged_in";

const SESSION_TTL_DAYS: i64 = 30;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user uid)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Authenticated user extracted from JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
}

/// Profile of an admin, attached by [`require_admin`].
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserProfile);

fn session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Validate a session token and return its claims.
pub fn decode_session(token: &str, signing_key: &[u8]) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(signing_key);
    let validation = Validation::new(Algorithm::HS256);

    let claims = decode::<Claims>(token, &key, &validation)
        .map_err(|_| AppError::InvalidToken)?
        .claims;

    if claims.sub.trim().is_empty() {
        return Err(AppError::InvalidToken);
    }
    Ok(claims)
}

fn authenticate(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = session_token(jar, headers).ok_or(AppError::Unauthorized)?;
    let claims = decode_session(&token, &state.config.jwt_signing_key)?;
    Ok(AuthUser { uid: claims.sub })
}

/// Middleware that requires valid JWT authentication.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_user = authenticate(&state, &jar, request.headers())?;
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Middleware that requires an authenticated admin.
///
/// The role comes from the stored profile, never from the token.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_user = authenticate(&state, &jar, request.headers())?;

    let profile = state
        .store
        .get_user(&auth_user.uid)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !profile.is_admin() {
        tracing::warn!(uid = %auth_user.uid, path = %request.uri().path(), "Non-admin denied");
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    request.extensions_mut().insert(auth_user);
    request.extensions_mut().insert(AdminUser(profile));

    Ok(next.run(request).await)
}

/// Resolve the session behind a page request.
///
/// Pages never fail: a missing, invalid or dangling session is simply
/// signed out.
pub async fn session_from_request(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> AuthSession {
    let Ok(user) = authenticate(state, jar, headers) else {
        return AuthSession::signed_out();
    };

    match state.store.get_user(&user.uid).await {
        Ok(Some(profile)) => AuthSession::signed_in(profile),
        Ok(None) => AuthSession::signed_out(),
        Err(e) => {
            tracing::warn!(uid = %user.uid, error = %e, "Session profile lookup failed");
            AuthSession::signed_out()
        }
    }
}

/// Create a JWT for a user session.
pub fn create_jwt(uid: &str, signing_key: &[u8]) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

    let claims = Claims {
        sub: uid.to_string(),
        iat: now,
        exp: now + (SESSION_TTL_DAYS as usize) * 24 * 60 * 60,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}

fn base_cookie(name: &'static str, value: String, http_only: bool, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(http_only)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Add the session cookies for a freshly issued token.
pub fn with_session_cookies(jar: CookieJar, token: String, secure: bool) -> CookieJar {
    let max_age = time::Duration::days(SESSION_TTL_DAYS);

    let mut session = base_cookie(SESSION_COOKIE, token, true, secure);
    session.set_max_age(max_age);
    let mut hint = base_cookie(LOGGED_IN_COOKIE, "1".to_string(), false, secure);
    hint.set_max_age(max_age);

    jar.add(session).add(hint)
}

/// Remove the session cookies, matching the attributes they were set with.
pub fn without_session_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.remove(base_cookie(SESSION_COOKIE, String::new(), true, secure))
        .remove(base_cookie(LOGGED_IN_COOKIE, String::new(), false, secure))
}
