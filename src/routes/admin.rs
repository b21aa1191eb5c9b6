// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin routes: inspect users and manage persona images.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, put},
    Extension, Json, Router,
};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::AdminUser;
use crate::models::{PersonaImage, UserProfile};
use crate::services::image::{format_file_size, MAX_FILE_SIZE};
use crate::services::{CancelHandle, ImageFile, PersonaService};
use crate::AppState;

/// Body limit for persona uploads. Larger than [`MAX_FILE_SIZE`] so that
/// oversized files reach validation and get a proper message.
const MAX_UPLOAD_BODY: usize = 4 * MAX_FILE_SIZE;

/// Admin routes. `require_admin` is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/users/{uid}", get(get_user))
        .route(
            "/api/admin/users/{uid}/persona",
            put(upload_persona)
                .delete(remove_persona)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY)),
        )
        .route(
            "/api/admin/users/{uid}/persona/upload",
            delete(cancel_persona_upload),
        )
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<UserProfile>> {
    let profile = state
        .store
        .get_user(&uid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;
    Ok(Json(profile))
}

/// Replace a user's persona image.
///
/// The request body is the raw image; `Content-Type` is its declared type.
async fn upload_persona(
    State(state): State<Arc<AppState>>,
    Extension(AdminUser(admin)): Extension<AdminUser>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PersonaImage>> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let file = ImageFile::new(media_type, body.to_vec());
    let original_size = file.size();

    let compressed = PersonaService::prepare(file).await?;
    tracing::info!(
        admin = %admin.uid,
        uid = %uid,
        original = %format_file_size(original_size as u64),
        compressed = %format_file_size(compressed.bytes.len() as u64),
        width = compressed.width,
        height = compressed.height,
        "Persona image compressed"
    );

    // A second upload for the same user is refused before it starts.
    let cancel = CancelHandle::new();
    let _registration = state.uploads.register(&uid, cancel.clone())?;

    let persona = state
        .persona_service
        .start_upload(&uid, compressed, cancel)
        .wait()
        .await?;
    Ok(Json(persona))
}

/// Cancel the persona upload in flight for a user.
async fn cancel_persona_upload(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<StatusCode> {
    if state.uploads.cancel(&uid) {
        tracing::info!(uid = %uid, "Persona upload cancel requested");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("No upload in progress for user {uid}")))
    }
}

async fn remove_persona(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<StatusCode> {
    state.persona_service.remove(&uid).await?;
    tracing::info!(uid = %uid, "Persona image removed");
    Ok(StatusCode::NO_CONTENT)
}
