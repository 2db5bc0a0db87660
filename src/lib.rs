//! Pluggable HTTP authentication for axum services.
//!
//! One strategy per service: Basic, API key, self-issued bearer tokens, or
//! OAuth2 authorization code + PKCE (optionally validating the OIDC ID
//! token) ending in a self-issued bearer token.

pub mod auth;
pub mod config;
pub mod server;
pub mod types;

pub use auth::{
    AuthContext, AuthError, AuthenticationMethod, AuthenticatorBuilder, CallbackParams, Claims,
    ConfigError, CurrentUser, Identity, InMemoryUserStore, MaybeUser, NewUser, OAuth2Authenticator,
    OAuth2Settings, OAuth2UserProvider, ProviderError, RouteDescriptor, StoredUser, Strategy,
    StrategyRegistry, TokenError, TokenIssuer, UserProvider, generate_api_key, hash_api_key,
    protect,
};
pub use config::{AuthConfig, StrategyConfig, resolve_config_path};
pub use server::Service;
