//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! Keys are fetched from the identity provider's `jwks_uri` and cached by
//! `kid`. The cache refreshes after its TTL, refetches when asked for an
//! unknown `kid` (key rotation), and can fall back to stale keys when the
//! endpoint is down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID (optional, used to match JWT header kid)
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Thread-safe JWKS cache with automatic refresh.
pub struct JwksCache {
    jwks_url: String,
    cache_ttl: Duration,
    /// Whether to serve stale keys when a refresh fails.
    allow_stale: bool,
    /// Cached keys by kid.
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
    /// Last successful fetch time.
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// Shared client; its timeout bounds every fetch.
    client: reqwest::Client,
}

impl JwksCache {
    pub fn new(
        jwks_url: impl Into<String>,
        client: reqwest::Client,
        cache_ttl_seconds: u64,
        allow_stale: bool,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            allow_stale,
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a decoding key by key ID.
    ///
    /// If `kid` is None, returns the only cached key, and fails when the set
    /// holds several. Fetches from the JWKS endpoint if the cache is stale or
    /// the key is not found.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksCacheError> {
        let should_refresh = {
            let last_fetch = self.last_fetch.read().await;
            match *last_fetch {
                Some(t) => t.elapsed() > self.cache_ttl,
                None => true,
            }
        };

        if !should_refresh {
            if let Some(key) = self.get_from_cache(kid).await? {
                return Ok(key);
            }
            debug!("Key {:?} not cached, refetching JWKS", kid);
        }

        match self.fetch_keys().await {
            Ok(()) => self.get_from_cache(kid).await?.ok_or_else(|| match kid {
                Some(k) => JwksCacheError::KeyNotFound(k.to_string()),
                None => JwksCacheError::NoKeysAvailable,
            }),
            Err(e) => {
                if self.allow_stale {
                    let stale_ok = self
                        .last_fetch
                        .read()
                        .await
                        .is_some_and(|t| t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS));

                    if stale_ok && let Some(key) = self.get_from_cache(kid).await? {
                        warn!("JWKS fetch failed, using stale cache: {}", e);
                        return Ok(key);
                    }
                }

                Err(e)
            }
        }
    }

    /// Look up a key without fetching.
    async fn get_from_cache(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, JwksCacheError> {
        let keys = self.keys.read().await;

        match kid {
            Some(k) => Ok(keys.get(k).cloned()),
            None if keys.len() > 1 => Err(JwksCacheError::AmbiguousKey),
            None => Ok(keys.values().next().cloned()),
        }
    }

    /// Fetch keys from the JWKS endpoint, replacing the cached set.
    pub async fn fetch_keys(&self) -> Result<(), JwksCacheError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self.client.get(&self.jwks_url).send().await.map_err(|e| {
            error!("JWKS endpoint unreachable: {}", e);
            JwksCacheError::FetchError(e.to_string())
        })?;

        if !response.status().is_success() {
            error!("JWKS endpoint returned {}", response.status());
            return Err(JwksCacheError::FetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksCacheError::ParseError(e.to_string()))?;

        let mut new_keys = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }

            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key");
                continue;
            }

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    debug!("Cached key with kid: {}", kid);
                    new_keys.insert(kid, decoding_key);
                }
                Err(e) => {
                    warn!("Failed to parse JWK: {}", e);
                }
            }
        }

        if new_keys.is_empty() {
            return Err(JwksCacheError::NoValidKeys);
        }

        let count = new_keys.len();
        *self.keys.write().await = new_keys;
        *self.last_fetch.write().await = Some(Instant::now());

        debug!("Cached {} keys from {}", count, self.jwks_url);
        Ok(())
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksCacheError> {
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| JwksCacheError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksCacheError::ParseError(format!("Invalid RSA components: {}", e)))
    }

    pub async fn has_keys(&self) -> bool {
        !self.keys.read().await.is_empty()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Drop every cached key and force a refetch on next use.
    pub async fn clear(&self) {
        self.keys.write().await.clear();
        *self.last_fetch.write().await = None;
    }
}

/// Errors that can occur when working with the JWKS cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwksCacheError {
    /// Failed to fetch JWKS from endpoint.
    FetchError(String),
    /// Failed to parse JWKS response.
    ParseError(String),
    /// No valid keys found in JWKS.
    NoValidKeys,
    /// Key with specified kid not found.
    KeyNotFound(String),
    /// No keys available in cache.
    NoKeysAvailable,
    /// The token names no `kid` and the set holds more than one key.
    AmbiguousKey,
}

impl JwksCacheError {
    /// Whether the failure is the endpoint's fault rather than the token's.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::FetchError(_) | Self::ParseError(_) | Self::NoValidKeys)
    }
}

impl std::fmt::Display for JwksCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
            Self::AmbiguousKey => write!(f, "Token has no kid and the key set has several keys"),
        }
    }
}

impl std::error::Error for JwksCacheError {}
