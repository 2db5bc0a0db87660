//! OAuth2 authorization code flow with PKCE, ending in a self-issued token.
//!
//! `GET {base}/login` creates a single-use state and a PKCE pair, stores the
//! verifier under the state and redirects to the provider. The provider
//! redirects back to `GET {base}/oauth2/callback?state=..&code=..`, which
//! consumes the state, pops the verifier, exchanges the code, optionally
//! validates the ID token, resolves the application user and finally
//! redirects to the success URL with a token signed by this service.
//!
//! The provider's access token never leaves the server.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::{HeaderMap, Method, StatusCode, header};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::bearer::{BearerAuthenticator, DEFAULT_BASE_PATH};
use crate::auth::error::{AuthError, ConfigError};
use crate::auth::exchange::{
    CodeExchanger, DEFAULT_HTTP_TIMEOUT, ExchangeError, HttpCodeExchanger, OAuth2Client,
    build_http_client,
};
use crate::auth::identity::{Identity, OAuth2UserProvider, UserProvider};
use crate::auth::oidc::{IdTokenValidator, OidcValidator};
use crate::auth::pkce::{self, CHALLENGE_METHOD};
use crate::auth::store::{DEFAULT_STATE_TTL, DEFAULT_VERIFIER_TTL, StateStore, VerifierStore};
use crate::auth::strategy::{RouteDescriptor, join_path};
use crate::auth::token::{DEFAULT_TOKEN_TTL_SECONDS, TokenIssuer};
use crate::types::{AuthorizationCode, BearerToken, CodeChallenge, StateToken};

/// Callback route, relative to the base path.
pub const CALLBACK_PATH: &str = "oauth2/callback";

/// Provider registration and flow settings.
#[derive(Clone)]
pub struct OAuth2Settings {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: Url,
    pub token_url: Url,
    /// Must point at `{base_path}/oauth2/callback` on this service.
    pub redirect_url: Url,
    pub scopes: Vec<String>,
    /// Where the user agent lands after login, with `token=<jwt>` appended.
    /// May be relative to this service.
    pub success_redirect: String,
    pub base_path: String,
    pub exp_seconds: u64,
    /// Enables ID-token validation when set.
    pub oidc_issuer: Option<Url>,
    pub http_timeout: Duration,
    pub state_ttl: Duration,
    pub verifier_ttl: Duration,
}

impl fmt::Debug for OAuth2Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Settings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("auth_url", &self.auth_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_str())
            .field("scopes", &self.scopes)
            .field("success_redirect", &self.success_redirect)
            .field("base_path", &self.base_path)
            .field("exp_seconds", &self.exp_seconds)
            .field("oidc_issuer", &self.oidc_issuer.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl OAuth2Settings {
    pub fn new(
        client_id: impl Into<String>,
        auth_url: Url,
        token_url: Url,
        redirect_url: Url,
        success_redirect: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            auth_url,
            token_url,
            redirect_url,
            scopes: Vec::new(),
            success_redirect: success_redirect.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            exp_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            oidc_issuer: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            state_ttl: DEFAULT_STATE_TTL,
            verifier_ttl: DEFAULT_VERIFIER_TTL,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_exp_seconds(mut self, exp_seconds: u64) -> Self {
        self.exp_seconds = exp_seconds;
        self
    }

    /// Require and validate an ID token from `issuer`.
    pub fn with_oidc_issuer(mut self, issuer: Url) -> Self {
        self.oidc_issuer = Some(issuer);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_ttls(mut self, state_ttl: Duration, verifier_ttl: Duration) -> Self {
        self.state_ttl = state_ttl;
        self.verifier_ttl = verifier_ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".into()));
        }
        if self.success_redirect.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "success_redirect must not be empty".into(),
            ));
        }
        if self.exp_seconds == 0 {
            return Err(ConfigError::Invalid("exp_seconds must be positive".into()));
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::Invalid("http timeout must be positive".into()));
        }
        if self.state_ttl.is_zero() {
            return Err(ConfigError::Invalid("state TTL must be positive".into()));
        }
        if self.verifier_ttl < self.state_ttl {
            return Err(ConfigError::Invalid(
                "verifier TTL must not be shorter than the state TTL".into(),
            ));
        }
        Ok(())
    }
}

/// Query parameters the provider sends to the callback.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// OAuth2-bearer strategy: owns the login/callback flow and authenticates
/// requests with the tokens that flow issues.
pub struct OAuth2Authenticator<U: Identity> {
    login_provider: Arc<dyn OAuth2UserProvider<User = U>>,
    bearer: BearerAuthenticator<U>,
    settings: OAuth2Settings,
    states: StateStore,
    verifiers: VerifierStore,
    exchanger: Arc<dyn CodeExchanger>,
    id_token_validator: Option<Arc<dyn IdTokenValidator>>,
}

impl<U: Identity> Clone for OAuth2Authenticator<U> {
    fn clone(&self) -> Self {
        Self {
            login_provider: self.login_provider.clone(),
            bearer: self.bearer.clone(),
            settings: self.settings.clone(),
            states: self.states.clone(),
            verifiers: self.verifiers.clone(),
            exchanger: self.exchanger.clone(),
            id_token_validator: self.id_token_validator.clone(),
        }
    }
}

impl<U: Identity> OAuth2Authenticator<U> {
    /// Build the strategy with an HTTP token exchanger and, when
    /// `settings.oidc_issuer` is set, an OIDC ID-token validator.
    pub fn new<P>(
        provider: Arc<P>,
        settings: OAuth2Settings,
        issuer: Arc<TokenIssuer>,
    ) -> Result<Self, ConfigError>
    where
        P: OAuth2UserProvider<User = U>,
    {
        settings.validate()?;

        let client = build_http_client(settings.http_timeout)?;
        let exchanger = HttpCodeExchanger::with_client(
            OAuth2Client {
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                token_url: settings.token_url.clone(),
                redirect_url: settings.redirect_url.clone(),
            },
            client.clone(),
        );
        let id_token_validator = settings.oidc_issuer.clone().map(|issuer| {
            Arc::new(OidcValidator::new(issuer, settings.client_id.clone(), client))
                as Arc<dyn IdTokenValidator>
        });

        let user_provider: Arc<dyn UserProvider<User = U>> = provider.clone();
        let login_provider: Arc<dyn OAuth2UserProvider<User = U>> = provider;
        let bearer = BearerAuthenticator::new(user_provider, issuer, settings.base_path.clone())
            .with_exp_seconds(settings.exp_seconds)
            .without_password_login();

        Ok(Self {
            login_provider,
            bearer,
            states: StateStore::new(settings.state_ttl),
            verifiers: VerifierStore::new(settings.verifier_ttl),
            exchanger: Arc::new(exchanger),
            id_token_validator,
            settings,
        })
    }

    /// Replace the token exchanger.
    pub fn with_exchanger(mut self, exchanger: Arc<dyn CodeExchanger>) -> Self {
        self.exchanger = exchanger;
        self
    }

    /// Replace (or install) the ID-token validator.
    pub fn with_id_token_validator(mut self, validator: Arc<dyn IdTokenValidator>) -> Self {
        self.id_token_validator = Some(validator);
        self
    }

    pub fn settings(&self) -> &OAuth2Settings {
        &self.settings
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn verifiers(&self) -> &VerifierStore {
        &self.verifiers
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        self.bearer.issuer()
    }

    pub fn login_path(&self) -> String {
        join_path(&self.settings.base_path, "login")
    }

    pub fn callback_path(&self) -> String {
        join_path(&self.settings.base_path, CALLBACK_PATH)
    }

    /// Authenticate a request carrying a token issued by this flow.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<U>, AuthError> {
        self.bearer.authenticate(headers).await
    }

    /// The provider authorization URL for `state` and `challenge`.
    pub fn authorization_url(&self, state: &StateToken, challenge: &CodeChallenge) -> Url {
        let mut url = self.settings.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", self.settings.redirect_url.as_str());
            if !self.settings.scopes.is_empty() {
                query.append_pair("scope", &self.settings.scopes.join(" "));
            }
            query
                .append_pair("state", state.as_str())
                .append_pair("code_challenge", challenge.as_str())
                .append_pair("code_challenge_method", CHALLENGE_METHOD);
        }
        url
    }

    /// Start a login: remember a fresh state and verifier and return the
    /// URL to send the user agent to.
    pub async fn begin_login(&self) -> Url {
        let state = self.states.generate().await;
        let pair = pkce::generate();
        self.verifiers.store(&state, pair.verifier).await;
        debug!("Started OAuth2 login");
        self.authorization_url(&state, &pair.challenge)
    }

    /// Finish a login from the callback parameters. Returns the success
    /// redirect target carrying the self-issued token.
    pub async fn complete_login(&self, params: CallbackParams) -> Result<String, AuthError> {
        let state = params.state.unwrap_or_default();
        if !self.states.validate_once(&state).await {
            warn!("Rejected OAuth2 callback: invalid, expired or replayed state");
            return Err(AuthError::InvalidState);
        }

        // Popped before anything else so the verifier never outlives the state.
        let verifier = self.verifiers.pop(&state).await;

        if let Some(error) = params.error {
            let reason = match params.error_description {
                Some(desc) => format!("{}: {}", error, desc),
                None => error,
            };
            warn!("OAuth2 provider denied authorization: {}", reason);
            return Err(AuthError::ProviderDenied(reason));
        }

        let Some(verifier) = verifier else {
            warn!("Rejected OAuth2 callback: no PKCE verifier for state");
            return Err(AuthError::MissingVerifier);
        };

        let code = match params.code {
            Some(code) if !code.is_empty() => AuthorizationCode::new(code),
            _ => {
                warn!("Rejected OAuth2 callback: missing authorization code");
                return Err(AuthError::MissingCode);
            }
        };

        let token = self
            .exchanger
            .exchange(&code, &verifier)
            .await
            .map_err(|e| {
                match &e {
                    ExchangeError::Unavailable(msg) => {
                        error!("Identity provider unavailable during code exchange: {}", msg)
                    }
                    other => warn!("Code exchange failed: {}", other),
                }
                AuthError::from(e)
            })?;

        if let Some(validator) = &self.id_token_validator {
            let Some(id_token) = &token.id_token else {
                warn!("Rejected OAuth2 login: token response has no ID token");
                return Err(AuthError::MissingIdToken);
            };
            let claims = validator.validate(id_token).await.map_err(|e| {
                if e.is_upstream() {
                    error!("Identity provider unavailable during ID token validation: {}", e);
                } else {
                    warn!("Rejected OAuth2 login: {}", e);
                }
                AuthError::from(e)
            })?;
            debug!("ID token accepted for provider subject {}", claims.sub);
        }

        let user = match self.login_provider.provide_for_login(&token.access_token).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("OAuth2 login resolved to no application user");
                return Err(AuthError::UserNotFound);
            }
            Err(e) => {
                error!("User provider failed during OAuth2 login: {}", e);
                return Err(AuthError::Provider(e.to_string()));
            }
        };

        let jwt = self.bearer.issue_for(&user)?;
        info!("OAuth2 login completed for user {}", user.id());

        Ok(success_location(&self.settings.success_redirect, &jwt))
    }

    pub fn routes(&self) -> Vec<RouteDescriptor> {
        vec![
            RouteDescriptor::new(Method::GET, self.login_path()),
            RouteDescriptor::new(Method::GET, self.callback_path()),
        ]
    }

    pub fn router(&self) -> Router {
        debug!(
            "Mounting OAuth2 routes at {} and {}",
            self.login_path(),
            self.callback_path()
        );
        Router::new()
            .route(&self.login_path(), get(login_handler::<U>))
            .route(&self.callback_path(), get(callback_handler::<U>))
            .with_state(Arc::new(self.clone()))
    }
}

/// `success_redirect` with `token=<jwt>` appended to its query. A fragment
/// stays at the end.
fn success_location(success_redirect: &str, token: &BearerToken) -> String {
    let (target, fragment) = match success_redirect.split_once('#') {
        Some((target, fragment)) => (target, Some(fragment)),
        None => (success_redirect, None),
    };
    let separator = if target.contains('?') { '&' } else { '?' };
    let mut location = format!("{}{}token={}", target, separator, token.as_str());
    if let Some(fragment) = fragment {
        location.push('#');
        location.push_str(fragment);
    }
    location
}

/// A 302 to `location` that caches must not keep.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}

async fn login_handler<U: Identity>(State(auth): State<Arc<OAuth2Authenticator<U>>>) -> Response {
    let url = auth.begin_login().await;
    found(url.as_str())
}

async fn callback_handler<U: Identity>(
    State(auth): State<Arc<OAuth2Authenticator<U>>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AuthError> {
    let location = auth.complete_login(params).await?;
    Ok(found(&location))
}
