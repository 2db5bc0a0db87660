//! The closed set of authentication strategies.
//!
//! Exactly one [`Strategy`] is active per service. Each variant knows which
//! credential it reads, how it resolves that credential into an identity and
//! which routes (if any) it needs mounted.

use std::fmt;

use axum::Router;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};

use crate::auth::api_key::ApiKeyAuthenticator;
use crate::auth::basic::BasicAuthenticator;
use crate::auth::bearer::BearerAuthenticator;
use crate::auth::error::AuthError;
use crate::auth::identity::Identity;
use crate::auth::oauth2::OAuth2Authenticator;

/// Which strategy resolved (or failed to resolve) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    Basic,
    ApiKey,
    Bearer,
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl AuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::ApiKey => "api_key",
            Self::Bearer => "bearer",
            Self::OAuth2 => "oauth2",
        }
    }
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route a strategy needs the dispatch layer to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub method: Method,
    pub path: String,
}

impl RouteDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The active authentication strategy.
pub enum Strategy<U: Identity> {
    Basic(BasicAuthenticator<U>),
    ApiKey(ApiKeyAuthenticator<U>),
    Bearer(BearerAuthenticator<U>),
    OAuth2(OAuth2Authenticator<U>),
}

impl<U: Identity> Strategy<U> {
    pub fn method(&self) -> AuthenticationMethod {
        match self {
            Self::Basic(_) => AuthenticationMethod::Basic,
            Self::ApiKey(_) => AuthenticationMethod::ApiKey,
            Self::Bearer(_) => AuthenticationMethod::Bearer,
            Self::OAuth2(_) => AuthenticationMethod::OAuth2,
        }
    }

    /// Resolve the request's credentials into an identity.
    ///
    /// `Ok(None)` when no credential of this strategy's kind is present.
    /// `Err` when one is present but does not resolve.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<U>, AuthError> {
        match self {
            Self::Basic(auth) => auth.authenticate(headers).await,
            Self::ApiKey(auth) => auth.authenticate(headers).await,
            Self::Bearer(auth) => auth.authenticate(headers).await,
            Self::OAuth2(auth) => auth.authenticate(headers).await,
        }
    }

    /// Routes this strategy owns.
    pub fn routes(&self) -> Vec<RouteDescriptor> {
        match self {
            Self::Basic(_) | Self::ApiKey(_) => Vec::new(),
            Self::Bearer(auth) => auth.routes(),
            Self::OAuth2(auth) => auth.routes(),
        }
    }

    /// Axum router serving [`Strategy::routes`].
    pub fn router(&self) -> Router {
        match self {
            Self::Basic(_) | Self::ApiKey(_) => Router::new(),
            Self::Bearer(auth) => auth.router(),
            Self::OAuth2(auth) => auth.router(),
        }
    }
}

impl<U: Identity> fmt::Debug for Strategy<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("method", &self.method())
            .field("routes", &self.routes())
            .finish()
    }
}

/// Join a base path and a suffix without doubling or dropping slashes.
pub(crate) fn join_path(base: &str, suffix: &str) -> String {
    let base = base.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", suffix)
    } else if base.starts_with('/') {
        format!("{}/{}", base, suffix)
    } else {
        format!("/{}/{}", base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!(AuthenticationMethod::Basic.to_string(), "basic");
        assert_eq!(AuthenticationMethod::ApiKey.to_string(), "api_key");
        assert_eq!(AuthenticationMethod::Bearer.to_string(), "bearer");
        assert_eq!(AuthenticationMethod::OAuth2.to_string(), "oauth2");
    }

    #[test]
    fn test_method_serde() {
        let json = serde_json::to_string(&AuthenticationMethod::OAuth2).unwrap();
        assert_eq!(json, "\"oauth2\"");
        let method: AuthenticationMethod = serde_json::from_str("\"api_key\"").unwrap();
        assert_eq!(method, AuthenticationMethod::ApiKey);
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/auth", "login"), "/auth/login");
        assert_eq!(join_path("/auth/", "/login"), "/auth/login");
        assert_eq!(join_path("auth", "oauth2/callback"), "/auth/oauth2/callback");
        assert_eq!(join_path("", "login"), "/login");
        assert_eq!(join_path("/", "login"), "/login");
    }

    #[test]
    fn test_route_descriptor_display() {
        let route = RouteDescriptor::new(Method::GET, "/auth/login");
        assert_eq!(route.to_string(), "GET /auth/login");
    }
}
