//! Credential extraction from HTTP requests, and axum extractors for the
//! resolved identity.

use axum::extract::FromRequestParts;
use base64::Engine as _;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use http::request::Parts;
use sha2::{Digest, Sha256};

use crate::auth::context::AuthContext;
use crate::auth::error::AuthError;
use crate::auth::identity::Identity;
use crate::auth::pkce::random_url_safe;
use crate::types::{ApiKeyHash, ApiKeyPrefix};

/// Default header carrying an API key.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Prefix of keys produced by [`generate_api_key`].
pub const API_KEY_PREFIX: &str = "ag";

/// The token of an `Authorization: Bearer <token>` header.
///
/// `None` for a missing header, a different scheme or an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let (scheme, rest) = authorization(headers)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

/// Username and password of an `Authorization: Basic <base64>` header.
///
/// `None` when the header is missing or cannot be decoded.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let (scheme, rest) = authorization(headers)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(rest.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Trimmed value of header `name`, `None` when missing or blank.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn authorization(headers: &HeaderMap) -> Option<(&str, &str)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    value.split_once(' ')
}

/// Hash an API key for storage and lookup (don't store raw keys).
pub fn hash_api_key(key: &str) -> ApiKeyHash {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    ApiKeyHash::new(format!("{:x}", result))
}

/// Generate a new API key with the format: prefix_randompart
/// Returns (full_key, prefix, hash)
pub fn generate_api_key() -> (String, ApiKeyPrefix, ApiKeyHash) {
    let prefix = ApiKeyPrefix::new(format!(
        "{}_{}",
        API_KEY_PREFIX,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    ));
    let secret = random_url_safe(24);
    let full_key = format!("{}_{}", prefix, secret);
    let key_hash = hash_api_key(&full_key);

    (full_key, prefix, key_hash)
}

/// The authenticated user. Rejects with 401 when the request is anonymous.
#[derive(Debug, Clone)]
pub struct CurrentUser<U>(pub U);

impl<S, U> FromRequestParts<S> for CurrentUser<U>
where
    S: Send + Sync,
    U: Identity,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext<U>>()
            .and_then(|ctx| ctx.user().cloned())
            .map(CurrentUser)
            .ok_or(AuthError::Unauthenticated)
    }
}

/// The authenticated user, if any. Never rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser<U>(pub Option<U>);

impl<S, U> FromRequestParts<S> for MaybeUser<U>
where
    S: Send + Sync,
    U: Identity,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts
                .extensions
                .get::<AuthContext<U>>()
                .and_then(|ctx| ctx.user().cloned()),
        ))
    }
}
