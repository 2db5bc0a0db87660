//! Strategy registration.
//!
//! A service holds one [`StrategyRegistry`]. The first registration wins;
//! every later attempt fails with [`ConfigError::DuplicateStrategy`] and
//! leaves the active strategy untouched.

use std::sync::Arc;

use tracing::{error, info};

use crate::auth::api_key::ApiKeyAuthenticator;
use crate::auth::basic::BasicAuthenticator;
use crate::auth::bearer::BearerAuthenticator;
use crate::auth::error::ConfigError;
use crate::auth::identity::{Identity, OAuth2UserProvider, UserProvider};
use crate::auth::oauth2::{OAuth2Authenticator, OAuth2Settings};
use crate::auth::strategy::{AuthenticationMethod, Strategy};
use crate::auth::token::{DEFAULT_TOKEN_TTL_SECONDS, TokenIssuer};

/// Holds the single active strategy of a service.
pub struct StrategyRegistry<U: Identity> {
    active: Option<Arc<Strategy<U>>>,
}

impl<U: Identity> Default for StrategyRegistry<U> {
    fn default() -> Self {
        Self { active: None }
    }
}

impl<U: Identity> StrategyRegistry<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with [`ConfigError::DuplicateStrategy`] if a strategy is active.
    pub fn ensure_vacant(&self, method: AuthenticationMethod) -> Result<(), ConfigError> {
        match &self.active {
            Some(existing) => {
                error!(
                    "Refusing to register {} authentication: {} is already active",
                    method,
                    existing.method()
                );
                Err(ConfigError::DuplicateStrategy(existing.method()))
            }
            None => Ok(()),
        }
    }

    /// Activate `strategy`. Fails if one is already active.
    pub fn register(&mut self, strategy: Strategy<U>) -> Result<Arc<Strategy<U>>, ConfigError> {
        self.ensure_vacant(strategy.method())?;

        for route in strategy.routes() {
            info!("Authentication route: {}", route);
        }
        info!("Registered {} authentication strategy", strategy.method());

        let strategy = Arc::new(strategy);
        self.active = Some(strategy.clone());
        Ok(strategy)
    }

    pub fn active(&self) -> Option<&Arc<Strategy<U>>> {
        self.active.as_ref()
    }
}

/// Fluent registration of a strategy backed by `provider`.
pub struct AuthenticatorBuilder<'a, P: UserProvider> {
    registry: &'a mut StrategyRegistry<P::User>,
    provider: Arc<P>,
    exp_seconds: u64,
    token_claims: Option<(String, String)>,
}

impl<'a, P: UserProvider> AuthenticatorBuilder<'a, P> {
    pub fn new(registry: &'a mut StrategyRegistry<P::User>, provider: Arc<P>) -> Self {
        Self {
            registry,
            provider,
            exp_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            token_claims: None,
        }
    }

    /// Lifetime of tokens issued by the bearer strategy.
    pub fn exp_seconds(mut self, exp_seconds: u64) -> Self {
        self.exp_seconds = exp_seconds;
        self
    }

    /// Override the `iss`/`aud` claims of issued tokens.
    pub fn token_claims(mut self, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        self.token_claims = Some((issuer.into(), audience.into()));
        self
    }

    fn user_provider(&self) -> Arc<dyn UserProvider<User = P::User>> {
        self.provider.clone()
    }

    fn token_issuer(&self, secret: &[u8]) -> Result<Arc<TokenIssuer>, ConfigError> {
        let issuer = TokenIssuer::new(secret)?;
        let issuer = match &self.token_claims {
            Some((iss, aud)) => issuer.with_claims(iss.clone(), aud.clone()),
            None => issuer,
        };
        Ok(Arc::new(issuer))
    }

    /// HTTP Basic.
    pub fn basic(self) -> Result<Arc<Strategy<P::User>>, ConfigError> {
        let basic = BasicAuthenticator::new(self.user_provider());
        self.registry.register(Strategy::Basic(basic))
    }

    /// API key from `X-API-Key`.
    pub fn api_key(self) -> Result<Arc<Strategy<P::User>>, ConfigError> {
        let api_key = ApiKeyAuthenticator::new(self.user_provider());
        self.registry.register(Strategy::ApiKey(api_key))
    }

    /// API key from a custom header.
    pub fn api_key_header(
        self,
        header: impl Into<String>,
    ) -> Result<Arc<Strategy<P::User>>, ConfigError> {
        self.registry.ensure_vacant(AuthenticationMethod::ApiKey)?;
        let header = header.into();
        if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
            return Err(ConfigError::Invalid(format!(
                "`{}` is not a valid header name",
                header
            )));
        }
        let api_key = ApiKeyAuthenticator::new(self.user_provider()).with_header(header);
        self.registry.register(Strategy::ApiKey(api_key))
    }

    /// Self-issued bearer tokens signed with `secret`, with a password
    /// login route under `base_path`.
    pub fn bearer(
        self,
        secret: &[u8],
        base_path: impl Into<String>,
    ) -> Result<Arc<Strategy<P::User>>, ConfigError> {
        self.registry.ensure_vacant(AuthenticationMethod::Bearer)?;
        if self.exp_seconds == 0 {
            return Err(ConfigError::Invalid("exp_seconds must be positive".into()));
        }
        let issuer = self.token_issuer(secret)?;
        let bearer = BearerAuthenticator::new(self.user_provider(), issuer, base_path)
            .with_exp_seconds(self.exp_seconds);
        self.registry.register(Strategy::Bearer(bearer))
    }
}

impl<'a, P: OAuth2UserProvider> AuthenticatorBuilder<'a, P> {
    /// OAuth2 authorization code + PKCE against the configured provider.
    pub fn oauth2(
        self,
        settings: OAuth2Settings,
        secret: &[u8],
    ) -> Result<Arc<Strategy<P::User>>, ConfigError> {
        self.registry.ensure_vacant(AuthenticationMethod::OAuth2)?;
        let issuer = self.token_issuer(secret)?;
        let oauth2 = OAuth2Authenticator::new(self.provider.clone(), settings, issuer)?;
        self.registry.register(Strategy::OAuth2(oauth2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{TEST_SECRET, TestProvider, TestUser};
    use url::Url;

    fn provider() -> Arc<TestProvider> {
        Arc::new(TestProvider::new())
    }

    #[test]
    fn test_register_basic() {
        let mut registry = StrategyRegistry::new();
        let strategy = AuthenticatorBuilder::new(&mut registry, provider())
            .basic()
            .unwrap();
        assert_eq!(strategy.method(), AuthenticationMethod::Basic);
        assert_eq!(
            registry.active().map(|s| s.method()),
            Some(AuthenticationMethod::Basic)
        );
    }

    #[test]
    fn test_second_registration_fails_and_keeps_first() {
        let mut registry = StrategyRegistry::new();
        AuthenticatorBuilder::new(&mut registry, provider())
            .api_key()
            .unwrap();

        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .bearer(TEST_SECRET, "/auth")
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateStrategy(AuthenticationMethod::ApiKey)
        );

        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .basic()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateStrategy(AuthenticationMethod::ApiKey)
        );
        assert_eq!(
            registry.active().map(|s| s.method()),
            Some(AuthenticationMethod::ApiKey)
        );
    }

    #[test]
    fn test_duplicate_reported_before_setting_errors() {
        let mut registry = StrategyRegistry::new();
        AuthenticatorBuilder::new(&mut registry, provider())
            .basic()
            .unwrap();

        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .bearer(b"", "/auth")
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStrategy(AuthenticationMethod::Basic));

        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .exp_seconds(0)
            .bearer(TEST_SECRET, "/auth")
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStrategy(AuthenticationMethod::Basic));

        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .api_key_header("bad header")
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStrategy(AuthenticationMethod::Basic));

        let mut settings = OAuth2Settings::new(
            "client-1",
            Url::parse("https://idp.example.com/authorize").unwrap(),
            Url::parse("https://idp.example.com/token").unwrap(),
            Url::parse("https://app.example.com/auth/oauth2/callback").unwrap(),
            "/",
        );
        settings.client_id = String::new();
        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .oauth2(settings, b"")
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStrategy(AuthenticationMethod::Basic));
    }

    #[test]
    fn test_bearer_requires_secret() {
        let mut registry: StrategyRegistry<TestUser> = StrategyRegistry::new();
        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .bearer(b"", "/auth")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedSecret(_)));
        assert!(registry.active().is_none());
    }

    #[test]
    fn test_bearer_routes_and_exp() {
        let mut registry = StrategyRegistry::new();
        let strategy = AuthenticatorBuilder::new(&mut registry, provider())
            .exp_seconds(600)
            .token_claims("issuer-x", "aud-y")
            .bearer(TEST_SECRET, "/api/auth")
            .unwrap();

        let routes: Vec<String> = strategy.routes().iter().map(|r| r.to_string()).collect();
        assert_eq!(routes, vec!["POST /api/auth/login"]);

        let Strategy::Bearer(bearer) = strategy.as_ref() else {
            panic!("expected bearer strategy");
        };
        assert_eq!(bearer.exp_seconds(), 600);
        assert_eq!(bearer.issuer().issuer(), "issuer-x");
        assert_eq!(bearer.issuer().audience(), "aud-y");
    }

    #[test]
    fn test_invalid_api_key_header() {
        let mut registry = StrategyRegistry::new();
        let err = AuthenticatorBuilder::new(&mut registry, provider())
            .api_key_header("bad header")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_register_oauth2() {
        let mut registry = StrategyRegistry::new();
        let settings = OAuth2Settings::new(
            "client-1",
            Url::parse("https://idp.example.com/authorize").unwrap(),
            Url::parse("https://idp.example.com/token").unwrap(),
            Url::parse("https://app.example.com/auth/oauth2/callback").unwrap(),
            "/",
        );
        let strategy = AuthenticatorBuilder::new(&mut registry, provider())
            .oauth2(settings, TEST_SECRET)
            .unwrap();
        assert_eq!(strategy.method(), AuthenticationMethod::OAuth2);
        assert_eq!(strategy.routes().len(), 2);
    }
}
