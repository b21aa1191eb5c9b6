// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Blob storage for persona images.
//!
//! Production uses Cloud Storage with application default credentials. Set
//! `STORAGE_EMULATOR_HOST` to talk to a local emulator without credentials.

use async_trait::async_trait;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::AppError;

/// Folder all persona images live under.
pub const PERSONA_PREFIX: &str = "persona-images";

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub url: String,
}

/// Object storage used for persona images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, AppError>;

    async fn delete(&self, path: &str) -> Result<(), AppError>;
}

/// Storage path for a persona image: `persona-images/{uid}/persona-{millis}.jpg`.
pub fn persona_object_path(uid: &str, unix_millis: i64) -> String {
    format!("{PERSONA_PREFIX}/{uid}/persona-{unix_millis}.jpg")
}

// ─── Cloud Storage ───────────────────────────────────────────────

/// Cloud Storage client.
pub struct GcsBlobStore {
    client: Client,
    bucket: String,
    /// Base for public object URLs (the API endpoint, or the emulator).
    endpoint: String,
}

impl GcsBlobStore {
    /// Connect to Cloud Storage, or to the emulator when
    /// `STORAGE_EMULATOR_HOST` is set.
    pub async fn new(bucket: &str) -> Result<Self, AppError> {
        let config = match std::env::var("STORAGE_EMULATOR_HOST") {
            Ok(host) => {
                tracing::info!(host = %host, "Using unauthenticated Cloud Storage emulator");
                let endpoint = if host.starts_with("http") {
                    host
                } else {
                    format!("http://{host}")
                };
                ClientConfig {
                    storage_endpoint: endpoint.trim_end_matches('/').to_string(),
                    ..ClientConfig::default().anonymous()
                }
            }
            Err(_) => ClientConfig::default().with_auth().await.map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Failed to create Cloud Storage auth config: {}",
                    e
                ))
            })?,
        };

        let endpoint = config.storage_endpoint.clone();
        let client = Client::new(config);

        tracing::info!(bucket, "Cloud Storage client initialized");

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            endpoint,
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, path)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, AppError> {
        let size = bytes.len();
        let mut media = Media::new(path.to_string());
        media.content_type = content_type.to_string().into();

        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                bytes,
                &UploadType::Simple(media),
            )
            .await
            .map_err(|e| AppError::Storage(format!("upload of {path} failed: {e}")))?;

        tracing::info!(path, size, "Uploaded object to Cloud Storage");

        Ok(StoredObject {
            path: path.to_string(),
            url: self.public_url(path),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), AppError> {
        use google_cloud_storage::http::Error;

        self.client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: path.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                Error::Response(ref response) if response.code == 404 => {
                    AppError::NotFound(path.to_string())
                }
                e => AppError::Storage(format!("delete of {path} failed: {e}")),
            })?;

        tracing::info!(path, "Deleted object from Cloud Storage");
        Ok(())
    }
}

// ─── In-memory ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Process-local blob store for offline development and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, MemoryObject>>,
    upload_delay: Option<Duration>,
    uploads_started: std::sync::atomic::AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload take at least `delay` (simulates a slow network).
    pub fn with_upload_delay(delay: Duration) -> Self {
        Self {
            upload_delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn get(&self, path: &str) -> Option<MemoryObject> {
        self.objects.read().await.get(path).cloned()
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of uploads that were started, finished or not.
    pub fn uploads_started(&self) -> usize {
        self.uploads_started
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, AppError> {
        self.uploads_started
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }

        self.objects.write().await.insert(
            path.to_string(),
            MemoryObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );

        Ok(StoredObject {
            path: path.to_string(),
            url: format!("memory://{path}"),
        })
    }

    async fn delete(&self, path: &str) -> Result<(), AppError> {
        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(path.to_string()))
    }
}
