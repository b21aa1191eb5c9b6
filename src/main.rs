// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Astro-Consult API Server
//!
//! Google sign-in, user profiles with birth details, consultation credits
//! and admin-managed persona images.

use astro_consult::{
    config::{Config, StoreBackend},
    db::{FirestoreDb, MemoryStore, ProfileStore},
    services::{BlobStore, GcsBlobStore, GoogleIdTokenVerifier, MemoryBlobStore, PersonaService, UploadRegistry},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        backend = ?config.store_backend,
        "Starting Astro-Consult API"
    );

    // Profile store and blob store travel together: in-memory mode is fully offline
    let (store, blobs): (Arc<dyn ProfileStore>, Arc<dyn BlobStore>) = match config.store_backend {
        StoreBackend::Firestore => {
            let db = FirestoreDb::new(&config.gcp_project_id)
                .await
                .expect("Failed to connect to Firestore");
            let blobs = GcsBlobStore::new(&config.storage_bucket)
                .await
                .expect("Failed to initialize Cloud Storage client");
            (Arc::new(db), Arc::new(blobs))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; data is lost on restart");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryBlobStore::new()))
        }
    };

    let google_verifier = Arc::new(
        GoogleIdTokenVerifier::new(&config).expect("Failed to initialize Google ID token verifier"),
    );

    let persona_service = PersonaService::new(store.clone(), blobs);

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        google_verifier,
        persona_service,
        uploads: UploadRegistry::new(),
    });

    // Build router
    let app = astro_consult::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("astro_consult=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
