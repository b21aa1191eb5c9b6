// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Admin persona image uploads.
//!
//! Flow: validate → compress (blocking pool) → upload to the blob store →
//! point the profile at the new image → drop the previous image.
//!
//! An upload runs as its own task and hands back a [`CancelHandle`]. A
//! cancelled upload never updates the profile; if the blob already landed
//! it is deleted again.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::ProfileStore;
use crate::error::{AppError, Result};
use crate::models::{PersonaImage, UserProfile};
use crate::services::image::{compress_image, validate_image_file, CompressedImage, ImageFile};
use crate::services::storage::{persona_object_path, BlobStore};
use crate::time_utils::{format_utc_rfc3339, unix_millis};

/// Persona upload orchestration.
#[derive(Clone)]
pub struct PersonaService {
    store: Arc<dyn ProfileStore>,
    blobs: Arc<dyn BlobStore>,
}

impl PersonaService {
    pub fn new(store: Arc<dyn ProfileStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Validate an upload and compress it off the async runtime.
    ///
    /// Validation failures never reach the decoder.
    pub async fn prepare(file: ImageFile) -> Result<CompressedImage> {
        validate_image_file(&file)?;

        let compressed = tokio::task::spawn_blocking(move || compress_image(&file))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("compression task failed: {e}")))??;

        Ok(compressed)
    }

    /// Start uploading a compressed image as `uid`'s persona.
    ///
    /// `cancel` may already be registered elsewhere; cancelling it at any
    /// point before the profile write aborts the upload.
    pub fn start_upload(
        &self,
        uid: &str,
        image: CompressedImage,
        cancel: CancelHandle,
    ) -> PersonaUpload {
        let token = cancel.0;
        let service = self.clone();
        let uid = uid.to_string();
        let task_token = token.clone();

        let handle =
            tokio::spawn(async move { service.run_upload(&uid, image, task_token).await });

        PersonaUpload { token, handle }
    }

    async fn run_upload(
        &self,
        uid: &str,
        image: CompressedImage,
        token: CancellationToken,
    ) -> Result<PersonaImage> {
        let previous = self
            .store
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?
            .persona;

        let now = chrono::Utc::now();
        let path = persona_object_path(uid, unix_millis(now));
        let size = image.bytes.len();

        let stored = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(uid, path = %path, "Persona upload cancelled before completion");
                return Err(AppError::UploadCancelled);
            }
            stored = self.blobs.upload(&path, image.bytes, image.media_type) => stored?,
        };

        if token.is_cancelled() {
            tracing::info!(uid, path = %path, "Persona upload cancelled after transfer, removing blob");
            if let Err(e) = self.blobs.delete(&stored.path).await {
                tracing::warn!(error = %e, path = %stored.path, "Failed to remove cancelled upload");
            }
            return Err(AppError::UploadCancelled);
        }

        let persona = PersonaImage {
            url: stored.url,
            path: stored.path,
            uploaded_at: format_utc_rfc3339(now),
        };

        self.store
            .set_persona(uid, Some(persona.clone()), &persona.uploaded_at)
            .await?;

        tracing::info!(
            uid,
            path = %persona.path,
            size,
            width = image.width,
            height = image.height,
            "Persona image updated"
        );

        if let Some(old) = previous.filter(|old| old.path != persona.path) {
            if let Err(e) = self.blobs.delete(&old.path).await {
                // The profile already points at the new image.
                tracing::warn!(error = %e, path = %old.path, "Failed to delete old persona image");
            }
        }

        Ok(persona)
    }

    /// Remove a user's persona image (blob first, best effort, then profile).
    pub async fn remove(&self, uid: &str) -> Result<UserProfile> {
        let profile = self
            .store
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;

        let Some(persona) = profile.persona else {
            return Ok(profile);
        };

        if let Err(e) = self.blobs.delete(&persona.path).await {
            tracing::warn!(error = %e, path = %persona.path, "Failed to delete persona blob");
        }

        self.store
            .set_persona(uid, None, &crate::time_utils::now_rfc3339())
            .await
    }
}

/// Capability to cancel one in-flight upload. Cloning shares the capability.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// A running persona upload.
pub struct PersonaUpload {
    token: CancellationToken,
    handle: JoinHandle<Result<PersonaImage>>,
}

impl PersonaUpload {
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.token.clone())
    }

    /// Wait for the upload to finish.
    pub async fn wait(self) -> Result<PersonaImage> {
        self.handle
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("upload task failed: {e}")))?
    }
}

/// In-flight uploads keyed by uid, so a separate request can cancel them.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    uploads: Arc<DashMap<String, CancelHandle>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upload. At most one upload per uid is in flight.
    ///
    /// The entry is removed when the returned guard is dropped.
    pub fn register(&self, uid: &str, handle: CancelHandle) -> Result<UploadRegistration> {
        match self.uploads.entry(uid.to_string()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "An upload is already in progress for user {uid}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(UploadRegistration {
                    uploads: self.uploads.clone(),
                    uid: uid.to_string(),
                })
            }
        }
    }

    /// Cancel the upload in flight for `uid`. Returns false if there is none.
    pub fn cancel(&self, uid: &str) -> bool {
        match self.uploads.get(uid) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.uploads.len()
    }
}

/// Registry entry guard.
pub struct UploadRegistration {
    uploads: Arc<DashMap<String, CancelHandle>>,
    uid: String,
}

impl Drop for UploadRegistration {
    fn drop(&mut self) {
        self.uploads.remove(&self.uid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::storage::{MemoryBlobStore, StoredObject};
    use std::time::Duration;

    const NOW: &str = "2026-01-01T00:00:00Z";

    async fn setup(blobs: MemoryBlobStore) -> (PersonaService, Arc<MemoryStore>, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(UserProfile::new_for_signup("u1", "u1@example.com", None, NOW))
            .await;
        let blobs = Arc::new(blobs);
        let service = PersonaService::new(store.clone(), blobs.clone());
        (service, store, blobs)
    }

    fn compressed() -> CompressedImage {
        CompressedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 10,
            height: 10,
            media_type: "image/jpeg",
        }
    }

    #[tokio::test]
    async fn upload_updates_profile_and_replaces_old_blob() {
        let (service, store, blobs) = setup(MemoryBlobStore::new()).await;

        let first = service.start_upload("u1", compressed(), CancelHandle::new()).wait().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = service.start_upload("u1", compressed(), CancelHandle::new()).wait().await.unwrap();

        assert_ne!(first.path, second.path);
        let profile = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(profile.persona, Some(second.clone()));
        assert_eq!(blobs.paths().await, vec![second.path]);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected_before_upload() {
        let (service, _, blobs) = setup(MemoryBlobStore::new()).await;
        let err = service.start_upload("ghost", compressed(), CancelHandle::new()).wait().await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(blobs.uploads_started(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_profile_update() {
        let (service, store, blobs) =
            setup(MemoryBlobStore::with_upload_delay(Duration::from_secs(10))).await;

        let upload = service.start_upload("u1", compressed(), CancelHandle::new());
        let cancel = upload.cancel_handle();

        // Let the task reach the blob store.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(blobs.uploads_started(), 1);
        cancel.cancel();

        let err = upload.wait().await.unwrap_err();
        assert!(matches!(err, AppError::UploadCancelled));

        let profile = store.get_user("u1").await.unwrap().unwrap();
        assert!(profile.persona.is_none());
        assert!(blobs.paths().await.is_empty());
    }

    #[tokio::test]
    async fn remove_clears_persona() {
        let (service, store, blobs) = setup(MemoryBlobStore::new()).await;
        service.start_upload("u1", compressed(), CancelHandle::new()).wait().await.unwrap();

        let profile = service.remove("u1").await.unwrap();
        assert!(profile.persona.is_none());
        assert!(store.get_user("u1").await.unwrap().unwrap().persona.is_none());
        assert!(blobs.paths().await.is_empty());

        // Removing again is a no-op.
        assert!(service.remove("u1").await.unwrap().persona.is_none());
    }

    #[tokio::test]
    async fn prepare_rejects_before_compressing() {
        let err = PersonaService::prepare(ImageFile::new("application/pdf", vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = PersonaService::prepare(ImageFile::new("image/png", vec![1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn registry_allows_one_upload_per_user() {
        let registry = UploadRegistry::new();
        let token = CancellationToken::new();

        let guard = registry
            .register("u1", CancelHandle(token.clone()))
            .unwrap();
        assert!(matches!(
            registry.register("u1", CancelHandle(CancellationToken::new())),
            Err(AppError::Conflict(_))
        ));

        assert!(registry.cancel("u1"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("u2"));

        drop(guard);
        assert_eq!(registry.in_flight(), 0);
        assert!(!registry.cancel("u1"));
    }

    /// Blob store that finishes the transfer and then cancels the upload,
    /// as if the cancel arrived just as the bytes landed.
    struct CancelAfterTransfer {
        inner: MemoryBlobStore,
        cancel: CancelHandle,
    }

    #[async_trait::async_trait]
    impl BlobStore for CancelAfterTransfer {
        async fn upload(
            &self,
            path: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<StoredObject> {
            let stored = self.inner.upload(path, bytes, content_type).await?;
            self.cancel.cancel();
            Ok(stored)
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }
    }

    #[tokio::test]
    async fn cancel_after_transfer_removes_blob() {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(UserProfile::new_for_signup("u1", "u1@example.com", None, NOW))
            .await;
        let cancel = CancelHandle::new();
        let blobs = Arc::new(CancelAfterTransfer {
            inner: MemoryBlobStore::new(),
            cancel: cancel.clone(),
        });
        let service = PersonaService::new(store.clone(), blobs.clone());

        let err = service
            .start_upload("u1", compressed(), cancel)
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadCancelled));
        assert_eq!(blobs.inner.uploads_started(), 1);
        assert!(blobs.inner.paths().await.is_empty());
        let profile = store.get_user("u1").await.unwrap().unwrap();
        assert!(profile.persona.is_none());
    }

    #[tokio::test]
    async fn cancel_before_start_never_transfers() {
        let (service, store, blobs) = setup(MemoryBlobStore::new()).await;
        let cancel = CancelHandle::new();
        cancel.cancel();

        let err = service
            .start_upload("u1", compressed(), cancel)
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UploadCancelled));
        assert_eq!(blobs.uploads_started(), 0);
        assert!(store.get_user("u1").await.unwrap().unwrap().persona.is_none());
    }
}
