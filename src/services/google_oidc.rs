// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google ID token verification for sign-in.
//!
//! The browser obtains an ID token from Google Identity Services and posts
//! it to `/auth/google`. We check the RS256 signature against Google's
//! published JWKS (cached per `Cache-Control`), the issuer, the audience
//! (our OAuth client ID) and that the email is verified.

use anyhow::Context;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;

const DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";
const DEFAULT_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const CLOCK_SKEW_SECS: u64 = 60;

/// A Google account that proved its identity with a valid ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    /// Stable Google account ID; used as our uid.
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// ID token verification failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OidcError {
    /// The token is malformed, expired, or its claims do not match.
    #[error("token rejected: {0}")]
    Rejected(String),
    /// Google's key endpoints could not be reached; the client may retry.
    #[error("transient verification failure: {0}")]
    Transient(String),
}

#[derive(Clone)]
enum KeySource {
    Google,
    Static {
        kid: String,
        decoding_key: Arc<DecodingKey>,
    },
}

#[derive(Clone)]
struct CachedJwksUri {
    uri: String,
    expires_at: Instant,
}

#[derive(Clone)]
struct CachedKeys {
    by_kid: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
}

/// Verifier for Google-issued sign-in ID tokens.
pub struct GoogleIdTokenVerifier {
    http_client: reqwest::Client,
    client_id: String,
    keys: KeySource,
    jwks_uri_cache: RwLock<Option<CachedJwksUri>>,
    key_cache: RwLock<Option<CachedKeys>>,
    refresh_lock: Mutex<()>,
}

impl GoogleIdTokenVerifier {
    /// Create a production verifier that discovers and caches Google JWKS keys.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let verifier = Self::build(config, KeySource::Google)?;

        tracing::info!(
            client_id = %verifier.client_id,
            "Initialized Google ID token verifier"
        );

        Ok(verifier)
    }

    /// Create a verifier that trusts a single static RSA public key.
    ///
    /// This is intended for deterministic local/integration tests.
    pub fn new_with_static_key(
        config: &Config,
        kid: impl Into<String>,
        decoding_key: DecodingKey,
    ) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            anyhow::bail!("static key kid must not be empty");
        }

        Self::build(
            config,
            KeySource::Static {
                kid,
                decoding_key: Arc::new(decoding_key),
            },
        )
    }

    fn build(config: &Config, keys: KeySource) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .context("failed building OIDC HTTP client")?;

        Ok(Self {
            http_client,
            client_id: config.google_client_id.clone(),
            keys,
            jwks_uri_cache: RwLock::new(None),
            key_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Verify a sign-in ID token and extract the Google identity.
    pub async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, OidcError> {
        let id_token = id_token.trim();
        if id_token.is_empty() {
            return Err(OidcError::Rejected("ID token is empty".to_string()));
        }

        let header = decode_header(id_token)
            .map_err(|e| OidcError::Rejected(format!("invalid JWT header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(OidcError::Rejected(format!(
                "unexpected JWT alg: {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| OidcError::Rejected("missing JWT kid".to_string()))?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.leeway = CLOCK_SKEW_SECS;

        let claims = decode::<GoogleIdTokenClaims>(id_token, decoding_key.as_ref(), &validation)
            .map_err(|e| OidcError::Rejected(format!("JWT validation failed: {e}")))?
            .claims;

        validate_iat(claims.iat)?;
        identity_from_claims(claims)
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<Arc<DecodingKey>, OidcError> {
        if let KeySource::Static {
            kid: static_kid,
            decoding_key,
        } = &self.keys
        {
            return if kid == static_kid {
                Ok(decoding_key.clone())
            } else {
                Err(OidcError::Rejected(format!(
                    "unknown JWT kid for static verifier: {kid}"
                )))
            };
        }

        if let Some(key) = self.cached_key(kid).await {
            return Ok(key);
        }

        // Google rotates keys; an unknown kid forces one refetch.
        for force_refresh in [false, true] {
            self.refresh_keys(force_refresh).await?;
            if let Some(key) = self.cached_key(kid).await {
                return Ok(key);
            }
        }

        Err(OidcError::Rejected(format!(
            "JWT kid not found in JWKS after refresh: {kid}"
        )))
    }

    async fn cached_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        let cache = self.key_cache.read().await;
        cache
            .as_ref()
            .filter(|entry| entry.expires_at > Instant::now())
            .and_then(|entry| entry.by_kid.get(kid))
            .cloned()
    }

    async fn refresh_keys(&self, force_refresh: bool) -> Result<(), OidcError> {
        let _guard = self.refresh_lock.lock().await;

        if !force_refresh
            && self
                .key_cache
                .read()
                .await
                .as_ref()
                .is_some_and(|entry| entry.expires_at > Instant::now())
        {
            return Ok(());
        }

        let jwks_uri = self.jwks_uri(force_refresh).await;
        tracing::debug!(jwks_uri = %jwks_uri, "Refreshing Google JWKS cache");

        let response = self
            .http_client
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::Transient(format!("JWKS request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OidcError::Transient(format!(
                "JWKS request returned status {}",
                response.status()
            )));
        }

        let ttl = cache_ttl_from_headers(response.headers(), DEFAULT_CACHE_TTL);

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| OidcError::Transient(format!("invalid JWKS JSON: {e}")))?;

        let by_kid = usable_keys(jwks);
        if by_kid.is_empty() {
            return Err(OidcError::Transient(
                "JWKS response did not include any usable RSA keys".to_string(),
            ));
        }

        *self.key_cache.write().await = Some(CachedKeys {
            by_kid,
            expires_at: Instant::now() + ttl,
        });

        tracing::debug!(ttl_secs = ttl.as_secs(), "Google JWKS cache refreshed");
        Ok(())
    }

    /// Resolve the JWKS URI via discovery, falling back to the well-known URL.
    async fn jwks_uri(&self, force_refresh: bool) -> String {
        let cached = self.jwks_uri_cache.read().await.clone();
        if let Some(entry) = cached
            .as_ref()
            .filter(|entry| !force_refresh && entry.expires_at > Instant::now())
        {
            return entry.uri.clone();
        }

        let fallback = || {
            cached
                .as_ref()
                .map(|entry| entry.uri.clone())
                .unwrap_or_else(|| DEFAULT_JWKS_URL.to_string())
        };

        let response = match self.http_client.get(DISCOVERY_URL).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(
                    status = %resp.status(),
                    "OIDC discovery returned non-success status; using fallback JWKS URI"
                );
                return fallback();
            }
            Err(e) => {
                tracing::warn!(error = %e, "OIDC discovery request failed; using fallback JWKS URI");
                return fallback();
            }
        };

        let ttl = cache_ttl_from_headers(response.headers(), DEFAULT_CACHE_TTL);
        match response.json::<OpenIdConfig>().await {
            Ok(discovery) => {
                *self.jwks_uri_cache.write().await = Some(CachedJwksUri {
                    uri: discovery.jwks_uri.clone(),
                    expires_at: Instant::now() + ttl,
                });
                discovery.jwks_uri
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid OIDC discovery document");
                fallback()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdConfig {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    alg: Option<String>,
    n: String,
    e: String,
    #[serde(rename = "use")]
    use_: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    iat: Option<usize>,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

/// RSA signing keys from a JWKS document, keyed by kid.
fn usable_keys(jwks: Jwks) -> HashMap<String, Arc<DecodingKey>> {
    let mut by_kid = HashMap::new();

    for jwk in jwks.keys {
        let is_rsa_sig = jwk.kty == "RSA"
            && !jwk.kid.trim().is_empty()
            && jwk.alg.as_deref().is_none_or(|alg| alg == "RS256")
            && jwk.use_.as_deref().is_none_or(|use_| use_ == "sig");
        if !is_rsa_sig {
            continue;
        }

        match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            Ok(key) => {
                by_kid.insert(jwk.kid, Arc::new(key));
            }
            Err(e) => {
                tracing::warn!(error = %e, kid = %jwk.kid, "Skipping invalid RSA JWKS key");
            }
        }
    }

    by_kid
}

fn identity_from_claims(claims: GoogleIdTokenClaims) -> Result<GoogleIdentity, OidcError> {
    let email = claims
        .email
        .filter(|email| !email.trim().is_empty())
        .ok_or_else(|| OidcError::Rejected("missing email claim".to_string()))?;

    if claims.email_verified != Some(true) {
        return Err(OidcError::Rejected("email is not verified".to_string()));
    }

    Ok(GoogleIdentity {
        uid: claims.sub,
        email,
        name: claims.name,
        picture: claims.picture,
    })
}

fn validate_iat(iat: Option<usize>) -> Result<(), OidcError> {
    let Some(iat) = iat else {
        return Err(OidcError::Rejected("missing iat claim".to_string()));
    };

    if iat as u64 > now_unix_secs() + CLOCK_SKEW_SECS {
        return Err(OidcError::Rejected("iat claim is in the future".to_string()));
    }

    Ok(())
}

fn cache_ttl_from_headers(headers: &reqwest::header::HeaderMap, fallback: Duration) -> Duration {
    headers
        .get(CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_cache_control_max_age)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

fn parse_cache_control_max_age(value: &str) -> Option<u64> {
    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|raw| raw.trim_matches('"').parse::<u64>().ok())
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(email: Option<&str>, verified: Option<bool>) -> GoogleIdTokenClaims {
        GoogleIdTokenClaims {
            sub: "1234567890".to_string(),
            iat: Some(now_unix_secs() as usize),
            email: email.map(str::to_string),
            email_verified: verified,
            name: Some("Asha".to_string()),
            picture: None,
        }
    }

    #[test]
    fn parse_cache_control_max_age_valid() {
        assert_eq!(
            parse_cache_control_max_age("public, max-age=3600"),
            Some(3600)
        );
        assert_eq!(parse_cache_control_max_age("max-age=60"), Some(60));
        assert_eq!(parse_cache_control_max_age("max-age=\"120\""), Some(120));
    }

    #[test]
    fn parse_cache_control_max_age_invalid() {
        assert_eq!(parse_cache_control_max_age("public, immutable"), None);
        assert_eq!(parse_cache_control_max_age("max-age=abc"), None);
        assert_eq!(parse_cache_control_max_age(""), None);
    }

    #[test]
    fn identity_requires_verified_email() {
        let identity = identity_from_claims(claims(Some("asha@example.com"), Some(true))).unwrap();
        assert_eq!(identity.uid, "1234567890");
        assert_eq!(identity.name.as_deref(), Some("Asha"));

        for (email, verified) in [
            (Some("asha@example.com"), Some(false)),
            (Some("asha@example.com"), None),
            (None, Some(true)),
            (Some(" "), Some(true)),
        ] {
            assert!(matches!(
                identity_from_claims(claims(email, verified)),
                Err(OidcError::Rejected(_))
            ));
        }
    }

    #[test]
    fn iat_in_future_is_rejected() {
        assert!(validate_iat(Some(now_unix_secs() as usize)).is_ok());
        assert!(validate_iat(None).is_err());
        let future = (now_unix_secs() + CLOCK_SKEW_SECS + 600) as usize;
        assert!(matches!(validate_iat(Some(future)), Err(OidcError::Rejected(_))));
    }

    #[tokio::test]
    async fn malformed_tokens_are_rejected() {
        let verifier = GoogleIdTokenVerifier::new(&Config::test_default()).unwrap();
        assert!(matches!(verifier.verify("").await, Err(OidcError::Rejected(_))));
        assert!(matches!(
            verifier.verify("not.a.jwt").await,
            Err(OidcError::Rejected(_))
        ));
    }

    #[test]
    fn jwks_filtering_skips_non_rsa_keys() {
        let jwks = Jwks {
            keys: vec![Jwk {
                kid: "ec".to_string(),
                kty: "EC".to_string(),
                alg: Some("ES256".to_string()),
                n: String::new(),
                e: String::new(),
                use_: Some("sig".to_string()),
            }],
        };
        assert!(usable_keys(jwks).is_empty());
    }
}
