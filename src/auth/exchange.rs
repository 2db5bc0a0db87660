//! Authorization-code exchange against the provider's token endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};
use url::Url;

use crate::auth::error::ConfigError;
use crate::types::{AuthorizationCode, CodeVerifier, IdToken, ProviderAccessToken};

/// Default timeout for every outbound call to the identity provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Token endpoint response (RFC 6749 section 5.1, plus the OIDC `id_token`).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: ProviderAccessToken,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<IdToken>,
}

/// Error body of a rejected token request (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Why a code exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The provider answered and refused the grant.
    Rejected(String),
    /// The provider answered with something that is not a token response.
    Malformed(String),
    /// The provider could not be reached, timed out or failed server-side.
    Unavailable(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "Token endpoint rejected the grant: {}", msg),
            Self::Malformed(msg) => write!(f, "Malformed token response: {}", msg),
            Self::Unavailable(msg) => write!(f, "Token endpoint unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Trades an authorization code plus PKCE verifier for tokens.
#[async_trait]
pub trait CodeExchanger: Send + Sync + 'static {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        verifier: &CodeVerifier,
    ) -> Result<TokenResponse, ExchangeError>;
}

/// Client credentials and endpoints for the provider's token endpoint.
#[derive(Clone)]
pub struct OAuth2Client {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub token_url: Url,
    pub redirect_url: Url,
}

impl fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_str())
            .finish()
    }
}

/// [`CodeExchanger`] that POSTs a form to the token endpoint.
#[derive(Debug, Clone)]
pub struct HttpCodeExchanger {
    client: reqwest::Client,
    oauth: OAuth2Client,
}

impl HttpCodeExchanger {
    pub fn new(oauth: OAuth2Client, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self::with_client(oauth, build_http_client(timeout)?))
    }

    /// Share an existing client (and its timeout).
    pub fn with_client(oauth: OAuth2Client, client: reqwest::Client) -> Self {
        Self { client, oauth }
    }
}

#[async_trait]
impl CodeExchanger for HttpCodeExchanger {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        verifier: &CodeVerifier,
    ) -> Result<TokenResponse, ExchangeError> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.oauth.redirect_url.as_str()),
            ("client_id", self.oauth.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        if let Some(secret) = self.oauth.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        debug!("Exchanging authorization code at {}", self.oauth.token_url);

        let response = self
            .client
            .post(self.oauth.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!("Token endpoint request failed: {}", e);
                ExchangeError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            error!("Token endpoint returned {}", status);
            return Err(ExchangeError::Unavailable(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| {
            error!("Failed to read token endpoint response: {}", e);
            ExchangeError::Unavailable(e.to_string())
        })?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}", status),
            };
            warn!("Token endpoint rejected code exchange: {}", reason);
            return Err(ExchangeError::Rejected(reason));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!("Token endpoint returned an unparsable body: {}", e);
            ExchangeError::Malformed(e.to_string())
        })?;

        if token.access_token.is_empty() {
            return Err(ExchangeError::Malformed("empty access_token".to_string()));
        }

        debug!(
            "Code exchange succeeded (id_token present: {})",
            token.id_token.is_some()
        );
        Ok(token)
    }
}

/// Outbound HTTP client with the given request timeout.
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}
