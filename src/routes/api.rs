// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{can_start_consultation, CreditType, Credits, ProfileUpdate, UserProfile};
use crate::time_utils::now_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me).patch(update_me))
        .route("/api/credits", get(get_credits))
        .route("/api/credits/{credit_type}", get(get_credit_balance))
}

// ─── User Profile ────────────────────────────────────────────

async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserProfile>> {
    let profile = state
        .store
        .get_user(&user.uid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.uid)))?;
    Ok(Json(profile))
}

/// Update name and birth details.
///
/// The body is taken as raw JSON so protected fields can be detected
/// before any typed parsing.
async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<UserProfile>> {
    let update = ProfileUpdate::from_json(payload).inspect_err(|e| {
        if matches!(e, AppError::SecurityViolation(_)) {
            tracing::warn!(uid = %user.uid, "Profile update tried to write a protected field");
        }
    })?;

    if update.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let profile = state
        .store
        .update_profile(&user.uid, &update, &now_rfc3339())
        .await?;

    tracing::info!(uid = %user.uid, "Profile updated");
    Ok(Json(profile))
}

// ─── Credits ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CreditsResponse {
    pub credits: Credits,
    /// All balances are zero.
    pub no_credits: bool,
}

async fn get_credits(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CreditsResponse>> {
    let credits = state.store.get_credits(&user.uid).await?;
    Ok(Json(CreditsResponse {
        credits,
        no_credits: credits.is_empty(),
    }))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CreditBalanceResponse {
    pub credit_type: CreditType,
    pub balance: u32,
    pub can_start: bool,
}

async fn get_credit_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(credit_type): Path<String>,
) -> Result<Json<CreditBalanceResponse>> {
    let credit_type: CreditType = credit_type.parse().map_err(AppError::BadRequest)?;
    let credits = state.store.get_credits(&user.uid).await?;

    Ok(Json(CreditBalanceResponse {
        credit_type,
        balance: credits.get(credit_type),
        can_start: can_start_consultation(&credits, credit_type),
    }))
}
