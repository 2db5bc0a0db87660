//! Error types for authentication.
//!
//! Two layers:
//! - [`ConfigError`]: setup-time failures. Fatal; the service must not start.
//! - [`AuthError`]: request-time failures surfaced to the dispatch boundary,
//!   each carrying the HTTP status it should be answered with.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::exchange::ExchangeError;
use crate::auth::identity::ProviderError;
use crate::auth::oidc::OidcError;
use crate::auth::strategy::AuthenticationMethod;
use crate::auth::token::TokenError;

/// Configuration errors raised while building the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A strategy is already registered on this service instance.
    DuplicateStrategy(AuthenticationMethod),
    /// The signing secret is missing or unusable.
    MalformedSecret(String),
    /// A configured URL does not parse.
    InvalidUrl { field: &'static str, message: String },
    /// A required setting is missing or out of range.
    Invalid(String),
    /// The outbound HTTP client could not be constructed.
    HttpClient(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStrategy(existing) => write!(
                f,
                "An authenticator is already registered ({})",
                existing
            ),
            Self::MalformedSecret(msg) => write!(f, "Malformed signing secret: {}", msg),
            Self::InvalidUrl { field, message } => {
                write!(f, "Invalid URL for `{}`: {}", field, message)
            }
            Self::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::HttpClient(msg) => write!(f, "Failed to build HTTP client: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Request-time authentication errors.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// The handler requires an identity and none was resolved.
    Unauthenticated,
    /// Credentials were presented but did not resolve to a user.
    InvalidCredentials,
    /// A bearer token failed validation.
    InvalidToken(TokenError),
    /// The `state` parameter is missing, unknown, expired or already used.
    InvalidState,
    /// No PKCE verifier is stored for the state (expired or replayed).
    MissingVerifier,
    /// The callback carried no authorization code.
    MissingCode,
    /// The provider redirected back with an `error` parameter.
    ProviderDenied(String),
    /// The token endpoint rejected the code exchange.
    ExchangeFailed(String),
    /// The identity provider could not be reached or answered garbage.
    UpstreamUnavailable(String),
    /// OIDC validation is enabled but the exchange returned no ID token.
    MissingIdToken,
    /// The ID token failed validation.
    InvalidIdToken(String),
    /// The login resolver found no application user for the access token.
    UserNotFound,
    /// The user resolution boundary failed. Never downgraded to "no identity".
    Provider(String),
    /// A self-issued token could not be signed.
    Signing(String),
}

impl AuthError {
    /// HTTP status the dispatch layer should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials | Self::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidState
            | Self::MissingVerifier
            | Self::MissingCode
            | Self::ProviderDenied(_)
            | Self::ExchangeFailed(_)
            | Self::UpstreamUnavailable(_)
            | Self::MissingIdToken
            | Self::InvalidIdToken(_)
            | Self::UserNotFound => StatusCode::BAD_REQUEST,
            Self::Provider(_) | Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client.
    ///
    /// Internal details (provider errors, upstream messages) stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthorized",
            Self::InvalidCredentials => "Invalid credentials",
            Self::InvalidToken(_) => "Invalid token",
            Self::InvalidState => "invalid state",
            Self::MissingVerifier => "missing PKCE verifier",
            Self::MissingCode => "missing authorization code",
            Self::ProviderDenied(_) => "Authorization denied",
            Self::ExchangeFailed(_) | Self::UpstreamUnavailable(_) => "Token Exchange Failed",
            Self::MissingIdToken => "Missing ID Token",
            Self::InvalidIdToken(_) => "Invalid ID Token",
            Self::UserNotFound => "User not found",
            Self::Provider(_) | Self::Signing(_) => "Internal Server Error",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::InvalidToken(err) => write!(f, "Invalid token: {}", err),
            Self::InvalidState => write!(f, "Invalid or already used state"),
            Self::MissingVerifier => write!(f, "Missing PKCE verifier for state"),
            Self::MissingCode => write!(f, "Callback is missing the authorization code"),
            Self::ProviderDenied(reason) => write!(f, "Provider denied authorization: {}", reason),
            Self::ExchangeFailed(msg) => write!(f, "Token exchange failed: {}", msg),
            Self::UpstreamUnavailable(msg) => write!(f, "Identity provider unavailable: {}", msg),
            Self::MissingIdToken => write!(f, "Token response did not include an ID token"),
            Self::InvalidIdToken(msg) => write!(f, "Invalid ID token: {}", msg),
            Self::UserNotFound => write!(f, "User not found"),
            Self::Provider(msg) => write!(f, "User provider error: {}", msg),
            Self::Signing(msg) => write!(f, "Failed to sign token: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.public_message() }));
        (self.status_code(), body).into_response()
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        Self::InvalidToken(err)
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidCredentials | ProviderError::NotFound => {
                Self::InvalidCredentials
            }
            ProviderError::Unavailable(msg) => Self::Provider(msg),
        }
    }
}

impl From<ExchangeError> for AuthError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Rejected(msg) | ExchangeError::Malformed(msg) => {
                Self::ExchangeFailed(msg)
            }
            ExchangeError::Unavailable(msg) => Self::UpstreamUnavailable(msg),
        }
    }
}

impl From<OidcError> for AuthError {
    fn from(err: OidcError) -> Self {
        if err.is_upstream() {
            Self::UpstreamUnavailable(err.to_string())
        } else {
            Self::InvalidIdToken(err.to_string())
        }
    }
}
