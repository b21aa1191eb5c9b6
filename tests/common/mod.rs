// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use astro_consult::config::Config;
use astro_consult::db::{FirestoreDb, MemoryStore};
use astro_consult::middleware::auth::create_jwt;
use astro_consult::models::{UserProfile, UserRole};
use astro_consult::routes::create_router;
use astro_consult::services::{GoogleIdTokenVerifier, MemoryBlobStore, PersonaService, UploadRegistry};
use astro_consult::AppState;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;

/// Key ID the test verifier trusts.
pub const TEST_KID: &str = "astro-test-key";
const TEST_PRIVATE_KEY: &[u8] = include_bytes!("../fixtures/google_test_rsa.pem");
const TEST_PUBLIC_KEY: &[u8] = include_bytes!("../fixtures/google_test_rsa_pub.pem");

#[allow(dead_code)]
pub const NOW: &str = "2026-01-01T00:00:00Z";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Offline app with in-memory stores and a static-key Google verifier.
#[allow(dead_code)]
pub struct TestContext {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        Self::with(Config::test_default(), MemoryBlobStore::new())
    }

    pub fn with(config: Config, blobs: MemoryBlobStore) -> Self {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(blobs);
        let decoding_key =
            DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY).expect("test public key should parse");
        let google_verifier = Arc::new(
            GoogleIdTokenVerifier::new_with_static_key(&config, TEST_KID, decoding_key)
                .expect("static verifier should build"),
        );

        let state = Arc::new(AppState {
            persona_service: PersonaService::new(store.clone(), blobs.clone()),
            config,
            store: store.clone(),
            google_verifier,
            uploads: UploadRegistry::new(),
        });

        Self {
            state,
            store,
            blobs,
        }
    }

    pub fn app(&self) -> axum::Router {
        create_router(self.state.clone())
    }

    /// Current stored profile; panics if missing.
    pub async fn store_profile(&self, uid: &str) -> UserProfile {
        use astro_consult::db::ProfileStore;
        self.store
            .get_user(uid)
            .await
            .expect("store read failed")
            .expect("profile should exist")
    }

    /// Seed a profile with the given role and return a session token for it.
    pub async fn sign_in_as(&self, uid: &str, role: UserRole) -> String {
        let mut profile = UserProfile::new_for_signup(uid, &format!("{uid}@example.com"), None, NOW);
        profile.role = role;
        self.store.seed(profile).await;
        session_token(&self.state.config, uid)
    }
}

/// Create a test app with offline in-memory dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let ctx = TestContext::new();
    (ctx.app(), ctx.state)
}

#[allow(dead_code)]
pub fn create_test_app_with_frontend_url(frontend_url: &str) -> (axum::Router, Arc<AppState>) {
    let mut config = Config::test_default();
    config.frontend_url = frontend_url.to_string();
    let ctx = TestContext::with(config, MemoryBlobStore::new());
    (ctx.app(), ctx.state)
}

/// Session JWT as issued after sign-in.
#[allow(dead_code)]
pub fn session_token(config: &Config, uid: &str) -> String {
    create_jwt(uid, &config.jwt_signing_key).expect("Failed to create JWT")
}

/// Google-style ID token signed with the test key.
#[allow(dead_code)]
pub fn google_id_token(claims: serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY).expect("test private key should parse");
    jsonwebtoken::encode(&header, &claims, &key).expect("Failed to sign ID token")
}

/// Claims of a valid ID token for `sub`.
#[allow(dead_code)]
pub fn google_claims(config: &Config, sub: &str, email: &str) -> serde_json::Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": "https://accounts.google.com",
        "aud": config.google_client_id,
        "sub": sub,
        "email": email,
        "email_verified": true,
        "name": "Test Seeker",
        "picture": "https://lh3.googleusercontent.com/a/test",
        "iat": now,
        "exp": now + 3600,
    })
}

/// Encode a solid-colour test image.
#[allow(dead_code)]
pub fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([180, 120, 40]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut bytes, format)
        .expect("Failed to encode test image");
    bytes.into_inner()
}

/// Read a JSON body.
#[allow(dead_code)]
pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body should be JSON")
}
