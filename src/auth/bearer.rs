//! Self-issued bearer token authentication.
//!
//! Clients obtain a token from `POST {base}/login` with a username and
//! password, then present it as `Authorization: Bearer <token>`. Only tokens
//! signed by this service's [`TokenIssuer`] are accepted.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auth::error::AuthError;
use crate::auth::extractor::bearer_token;
use crate::auth::identity::{Identity, ProviderError, UserProvider};
use crate::auth::strategy::{RouteDescriptor, join_path};
use crate::auth::token::{DEFAULT_TOKEN_TTL_SECONDS, TokenIssuer};
use crate::types::BearerToken;

/// Default mount point for strategy routes.
pub const DEFAULT_BASE_PATH: &str = "/auth";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: BearerToken,
    pub token_type: String,
    pub expires_in: u64,
}

/// Validates self-issued tokens and resolves their subject.
pub struct BearerAuthenticator<U: Identity> {
    provider: Arc<dyn UserProvider<User = U>>,
    issuer: Arc<TokenIssuer>,
    exp_seconds: u64,
    base_path: String,
    password_login: bool,
}

impl<U: Identity> Clone for BearerAuthenticator<U> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            issuer: self.issuer.clone(),
            exp_seconds: self.exp_seconds,
            base_path: self.base_path.clone(),
            password_login: self.password_login,
        }
    }
}

impl<U: Identity> BearerAuthenticator<U> {
    /// Tokens live for one day unless [`with_exp_seconds`](Self::with_exp_seconds)
    /// says otherwise.
    pub fn new(
        provider: Arc<dyn UserProvider<User = U>>,
        issuer: Arc<TokenIssuer>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            issuer,
            exp_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            base_path: base_path.into(),
            password_login: true,
        }
    }

    pub fn with_exp_seconds(mut self, exp_seconds: u64) -> Self {
        self.exp_seconds = exp_seconds;
        self
    }

    /// Drop the username/password login route. Used when tokens are only
    /// minted by another flow (OAuth2).
    pub(crate) fn without_password_login(mut self) -> Self {
        self.password_login = false;
        self
    }

    pub fn exp_seconds(&self) -> u64 {
        self.exp_seconds
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Sign a token for `user`.
    pub fn issue_for(&self, user: &U) -> Result<BearerToken, AuthError> {
        self.issuer.issue(user.id(), self.exp_seconds).map_err(|e| {
            error!("Failed to sign bearer token for user {}: {}", user.id(), e);
            AuthError::Signing(e.to_string())
        })
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<U>, AuthError> {
        let Some(token) = bearer_token(headers) else {
            return Ok(None);
        };

        let subject = self.issuer.validate(token).map_err(|e| {
            warn!("Rejected bearer token: {}", e);
            AuthError::InvalidToken(e)
        })?;

        match self.provider.provide_by_id(subject).await {
            Ok(user) => Ok(Some(user)),
            Err(ProviderError::Unavailable(msg)) => {
                error!("User provider failed resolving subject {}: {}", subject, msg);
                Err(AuthError::Provider(msg))
            }
            Err(e) => {
                warn!("Bearer token subject {} did not resolve: {}", subject, e);
                Err(e.into())
            }
        }
    }

    /// Exchange a username and password for a fresh token.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let user = self
            .provider
            .provide_by_user_pass(&request.username, &request.password)
            .await
            .map_err(|e| match e {
                ProviderError::Unavailable(msg) => {
                    error!("User provider failed during bearer login: {}", msg);
                    AuthError::Provider(msg)
                }
                other => {
                    warn!("Bearer login rejected: {}", other);
                    other.into()
                }
            })?;

        let token = self.issue_for(&user)?;
        info!("Issued bearer token for user {}", user.id());

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in: self.exp_seconds,
        })
    }

    pub fn login_path(&self) -> String {
        join_path(&self.base_path, "login")
    }

    pub fn routes(&self) -> Vec<RouteDescriptor> {
        if self.password_login {
            vec![RouteDescriptor::new(Method::POST, self.login_path())]
        } else {
            Vec::new()
        }
    }

    pub fn router(&self) -> Router {
        if !self.password_login {
            return Router::new();
        }
        debug!("Mounting bearer login at {}", self.login_path());
        Router::new()
            .route(&self.login_path(), post(login_handler::<U>))
            .with_state(Arc::new(self.clone()))
    }
}

async fn login_handler<U: Identity>(
    State(auth): State<Arc<BearerAuthenticator<U>>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    auth.login(&request).await.map(Json)
}
