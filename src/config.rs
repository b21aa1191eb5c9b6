//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the Cloud Run secret
//! bindings, so everything is read once at startup.

use std::env;
use std::time::Duration;

use crate::session::RetryPolicy;

/// Which profile store backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Firestore (or the Firestore emulator).
    Firestore,
    /// Process-local store for offline development.
    Memory,
}

impl StoreBackend {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::Invalid("STORE_BACKEND", raw.to_string())),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// OAuth client ID that Google ID tokens must be issued for
    pub google_client_id: String,
    /// Frontend URL (CORS origin, redirect base)
    pub frontend_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Cloud Storage bucket holding persona images
    pub storage_bucket: String,
    /// Server port
    pub port: u16,
    /// Profile store backend
    pub store_backend: StoreBackend,
    /// Backoff used by session observers while a new profile is provisioned
    pub profile_retry: RetryPolicy,

    // --- Secrets ---
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
}

impl Config {
    /// Default config for testing only.
    pub fn test_default() -> Self {
        Self {
            google_client_id: "test-client-id.apps.googleusercontent.com".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            gcp_project_id: "test-project".to_string(),
            storage_bucket: "test-project.appspot.com".to_string(),
            port: 8080,
            store_backend: StoreBackend::Memory,
            profile_retry: RetryPolicy::default(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let gcp_project_id =
            env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string());

        let storage_bucket = env::var("STORAGE_BUCKET")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| format!("{gcp_project_id}.appspot.com"));

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(raw) => StoreBackend::parse(&raw)?,
            Err(_) => StoreBackend::Firestore,
        };

        let defaults = RetryPolicy::default();
        let profile_retry = RetryPolicy {
            max_retries: parse_or("PROFILE_FETCH_RETRIES", defaults.max_retries)?,
            base_delay: Duration::from_millis(parse_or(
                "PROFILE_FETCH_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
        };

        Ok(Self {
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("GOOGLE_CLIENT_ID"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            gcp_project_id,
            storage_bucket,
            port: parse_or("PORT", 8080)?,
            store_backend,
            profile_retry,

            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
        })
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.frontend_url.starts_with("https://")
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("GOOGLE_CLIENT_ID", "client.apps.googleusercontent.com");
        env::set_var("JWT_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("GCP_PROJECT_ID", "astro-test");
        env::set_var("PROFILE_FETCH_BASE_DELAY_MS", "250");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.google_client_id, "client.apps.googleusercontent.com");
        assert_eq!(config.port, 8080);
        assert_eq!(config.storage_bucket, "astro-test.appspot.com");
        assert_eq!(config.profile_retry.max_retries, 5);
        assert_eq!(config.profile_retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(StoreBackend::parse("memory").unwrap(), StoreBackend::Memory);
        assert_eq!(
            StoreBackend::parse(" Firestore ").unwrap(),
            StoreBackend::Firestore
        );
        assert!(matches!(
            StoreBackend::parse("sqlite"),
            Err(ConfigError::Invalid("STORE_BACKEND", _))
        ));
    }

    #[test]
    fn test_secure_cookies_follow_frontend_scheme() {
        let mut config = Config::test_default();
        assert!(!config.secure_cookies());
        config.frontend_url = "https://astro.example.com".to_string();
        assert!(config.secure_cookies());
    }
}
