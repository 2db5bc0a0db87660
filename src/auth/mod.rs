//! Pluggable request authentication.
//!
//! A service activates exactly one strategy through [`AuthenticatorBuilder`]:
//!
//! - **Basic**: `Authorization: Basic` checked against the user provider
//! - **API key**: a key read from `X-API-Key` (or a configured header)
//! - **Bearer**: HS256 tokens issued by this service, with a password login route
//! - **OAuth2**: authorization code + PKCE against an external provider,
//!   optionally validating the OIDC ID token, ending in a self-issued bearer token
//!
//! [`protect`] wraps a router so that every request carries an
//! [`AuthContext`]; handlers pick [`CurrentUser`] or [`MaybeUser`].
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = StrategyRegistry::new();
//! let strategy = AuthenticatorBuilder::new(&mut registry, store.clone())
//!     .bearer(secret.as_bytes(), "/auth")?;
//!
//! let app = protect(Router::new().route("/me", get(me)), strategy.clone())
//!     .merge(strategy.router());
//! ```

mod api_key;
mod basic;
mod bearer;
mod builder;
mod context;
mod error;
pub mod exchange;
mod extractor;
mod identity;
pub mod jwks;
mod middleware;
mod oauth2;
pub mod oidc;
pub mod pkce;
pub mod store;
mod strategy;
mod token;
mod user_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use api_key::ApiKeyAuthenticator;
pub use basic::BasicAuthenticator;
pub use bearer::{BearerAuthenticator, DEFAULT_BASE_PATH, LoginRequest, LoginResponse};
pub use builder::{AuthenticatorBuilder, StrategyRegistry};
pub use context::AuthContext;
pub use error::{AuthError, ConfigError};
pub use extractor::{
    API_KEY_PREFIX, CurrentUser, DEFAULT_API_KEY_HEADER, MaybeUser, generate_api_key,
    hash_api_key,
};
pub use identity::{Identity, OAuth2UserProvider, ProviderError, UserProvider};
pub use middleware::protect;
pub use oauth2::{CALLBACK_PATH, CallbackParams, OAuth2Authenticator, OAuth2Settings};
pub use strategy::{AuthenticationMethod, RouteDescriptor, Strategy};
pub use token::{
    Claims, DEFAULT_AUDIENCE, DEFAULT_ISSUER, DEFAULT_TOKEN_TTL_SECONDS, TokenError, TokenIssuer,
};
pub use user_store::{InMemoryUserStore, NewUser, OAUTH2_PROVIDER, StoredUser};
