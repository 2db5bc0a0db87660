//! Static API-key authentication.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, error, warn};

use crate::auth::error::AuthError;
use crate::auth::extractor::{DEFAULT_API_KEY_HEADER, header_value};
use crate::auth::identity::{Identity, ProviderError, UserProvider};

/// Resolves an API key from a fixed request header.
pub struct ApiKeyAuthenticator<U: Identity> {
    provider: Arc<dyn UserProvider<User = U>>,
    header: String,
}

impl<U: Identity> Clone for ApiKeyAuthenticator<U> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            header: self.header.clone(),
        }
    }
}

impl<U: Identity> ApiKeyAuthenticator<U> {
    /// Read keys from `X-API-Key`.
    pub fn new(provider: Arc<dyn UserProvider<User = U>>) -> Self {
        Self {
            provider,
            header: DEFAULT_API_KEY_HEADER.to_string(),
        }
    }

    /// Read keys from `header` instead.
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<U>, AuthError> {
        let Some(key) = header_value(headers, &self.header) else {
            return Ok(None);
        };

        match self.provider.provide_by_api_key(key).await {
            Ok(user) => {
                debug!("API key accepted for user {}", user.id());
                Ok(Some(user))
            }
            Err(ProviderError::Unavailable(msg)) => {
                error!("User provider failed during API key authentication: {}", msg);
                Err(AuthError::Provider(msg))
            }
            Err(e) => {
                warn!("API key rejected: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{TestProvider, TestUser};
    use http::HeaderValue;

    fn with_key(header: &'static str, key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header, HeaderValue::from_str(key).unwrap());
        headers
    }

    fn setup() -> (ApiKeyAuthenticator<TestUser>, TestUser) {
        let provider = TestProvider::new();
        let user = provider.add_api_key("ag_test_key");
        (ApiKeyAuthenticator::new(Arc::new(provider)), user)
    }

    #[tokio::test]
    async fn test_valid_key() {
        let (auth, user) = setup();
        let resolved = auth
            .authenticate(&with_key("x-api-key", "ag_test_key"))
            .await
            .unwrap();
        assert_eq!(resolved.map(|u| u.id()), Some(user.id()));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let (auth, _) = setup();
        let result = auth.authenticate(&with_key("x-api-key", "wrong_key")).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_missing_or_empty_header_is_none() {
        let (auth, _) = setup();
        assert!(auth.authenticate(&HeaderMap::new()).await.unwrap().is_none());
        assert!(
            auth.authenticate(&with_key("x-api-key", ""))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_custom_header() {
        let (auth, user) = setup();
        let auth = auth.with_header("X-Service-Token");
        assert_eq!(auth.header(), "X-Service-Token");

        // The default header is no longer consulted.
        assert!(
            auth.authenticate(&with_key("x-api-key", "ag_test_key"))
                .await
                .unwrap()
                .is_none()
        );

        let resolved = auth
            .authenticate(&with_key("x-service-token", "ag_test_key"))
            .await
            .unwrap();
        assert_eq!(resolved.map(|u| u.id()), Some(user.id()));
    }
}
