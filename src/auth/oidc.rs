//! OpenID Connect ID-token validation.
//!
//! The validator discovers the issuer's metadata from
//! `{issuer}/.well-known/openid-configuration` on first use, then verifies
//! ID tokens against the advertised `jwks_uri`. Only RSA signatures are
//! accepted; an HMAC-signed "ID token" could have been minted by anyone who
//! knows the client secret.

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksCacheError};
use crate::types::IdToken;

/// Clock skew tolerated on `exp`/`nbf`/`iat` of provider-issued tokens.
pub const DEFAULT_LEEWAY_SECONDS: u64 = 60;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

const ALLOWED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// The subset of the OIDC discovery document this crate uses.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Claims of a validated ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    /// Discovery document could not be fetched or parsed.
    Discovery(String),
    /// The discovery document advertises a different issuer.
    IssuerMismatch { expected: String, actual: String },
    /// Signing keys could not be obtained.
    Jwks(JwksCacheError),
    /// The token is signed with an algorithm outside RS256/RS384/RS512.
    AlgorithmNotAllowed(String),
    /// Not a structurally valid JWT.
    Malformed(String),
    /// Signature, issuer, audience or time checks failed.
    Invalid(String),
}

impl OidcError {
    /// Whether the identity provider (not the token) is at fault.
    pub fn is_upstream(&self) -> bool {
        match self {
            Self::Discovery(_) => true,
            Self::Jwks(e) => e.is_upstream(),
            _ => false,
        }
    }
}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery(msg) => write!(f, "OIDC discovery failed: {}", msg),
            Self::IssuerMismatch { expected, actual } => write!(
                f,
                "Discovery issuer mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::Jwks(e) => write!(f, "{}", e),
            Self::AlgorithmNotAllowed(alg) => write!(f, "ID token algorithm not allowed: {}", alg),
            Self::Malformed(msg) => write!(f, "Malformed ID token: {}", msg),
            Self::Invalid(msg) => write!(f, "ID token rejected: {}", msg),
        }
    }
}

impl std::error::Error for OidcError {}

impl From<JwksCacheError> for OidcError {
    fn from(err: JwksCacheError) -> Self {
        Self::Jwks(err)
    }
}

/// Verifies provider-issued ID tokens.
#[async_trait]
pub trait IdTokenValidator: Send + Sync + 'static {
    async fn validate(&self, id_token: &IdToken) -> Result<IdTokenClaims, OidcError>;
}

struct Discovered {
    issuer: String,
    jwks: JwksCache,
}

/// [`IdTokenValidator`] backed by OIDC discovery and a JWKS cache.
pub struct OidcValidator {
    issuer: Url,
    client_id: String,
    client: reqwest::Client,
    leeway: u64,
    discovered: OnceCell<Discovered>,
}

impl fmt::Debug for OidcValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcValidator")
            .field("issuer", &self.issuer.as_str())
            .field("client_id", &self.client_id)
            .field("discovered", &self.discovered.initialized())
            .finish()
    }
}

impl OidcValidator {
    /// `client_id` is the audience every ID token must carry.
    pub fn new(issuer: Url, client_id: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            client,
            leeway: DEFAULT_LEEWAY_SECONDS,
            discovered: OnceCell::new(),
        }
    }

    pub fn with_leeway(mut self, leeway_seconds: u64) -> Self {
        self.leeway = leeway_seconds;
        self
    }

    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    fn discovery_url(&self) -> String {
        format!("{}/{}", self.issuer.as_str().trim_end_matches('/'), DISCOVERY_PATH)
    }

    /// Fetch the discovery document.
    pub async fn discover(&self) -> Result<OidcDiscovery, OidcError> {
        let url = self.discovery_url();
        debug!("Fetching OIDC discovery document from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            error!("OIDC discovery endpoint unreachable: {}", e);
            OidcError::Discovery(e.to_string())
        })?;

        if !response.status().is_success() {
            error!("OIDC discovery endpoint returned {}", response.status());
            return Err(OidcError::Discovery(format!("HTTP {}", response.status())));
        }

        let doc: OidcDiscovery = response
            .json()
            .await
            .map_err(|e| OidcError::Discovery(e.to_string()))?;

        let expected = self.issuer.as_str().trim_end_matches('/');
        if doc.issuer.trim_end_matches('/') != expected {
            warn!(
                "OIDC discovery advertises issuer {} but {} is configured",
                doc.issuer, expected
            );
            return Err(OidcError::IssuerMismatch {
                expected: expected.to_string(),
                actual: doc.issuer,
            });
        }

        Ok(doc)
    }

    async fn discovered(&self) -> Result<&Discovered, OidcError> {
        self.discovered
            .get_or_try_init(|| async {
                let doc = self.discover().await?;
                info!("Discovered OIDC issuer {} (jwks: {})", doc.issuer, doc.jwks_uri);
                Ok::<_, OidcError>(Discovered {
                    issuer: doc.issuer,
                    jwks: JwksCache::new(
                        doc.jwks_uri,
                        self.client.clone(),
                        DEFAULT_CACHE_TTL_SECONDS,
                        true,
                    ),
                })
            })
            .await
    }
}

#[async_trait]
impl IdTokenValidator for OidcValidator {
    async fn validate(&self, id_token: &IdToken) -> Result<IdTokenClaims, OidcError> {
        let header =
            decode_header(id_token.as_str()).map_err(|e| OidcError::Malformed(e.to_string()))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            warn!("Rejected ID token signed with {:?}", header.alg);
            return Err(OidcError::AlgorithmNotAllowed(format!("{:?}", header.alg)));
        }

        let discovered = self.discovered().await?;
        let key = discovered.jwks.get_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway;
        validation.set_issuer(&[&discovered.issuer]);
        validation.set_audience(&[&self.client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<IdTokenClaims>(id_token.as_str(), &key, &validation).map_err(|e| {
            warn!("ID token rejected: {}", e);
            OidcError::Invalid(e.to_string())
        })?;

        debug!("ID token verified for subject {}", data.claims.sub);
        Ok(data.claims)
    }
}
