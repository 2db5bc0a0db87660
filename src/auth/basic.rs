//! HTTP Basic authentication.

use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, error, warn};

use crate::auth::error::AuthError;
use crate::auth::extractor::basic_credentials;
use crate::auth::identity::{Identity, ProviderError, UserProvider};

/// Resolves `Authorization: Basic` credentials through the user provider.
pub struct BasicAuthenticator<U: Identity> {
    provider: Arc<dyn UserProvider<User = U>>,
}

impl<U: Identity> Clone for BasicAuthenticator<U> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}

impl<U: Identity> BasicAuthenticator<U> {
    pub fn new(provider: Arc<dyn UserProvider<User = U>>) -> Self {
        Self { provider }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<U>, AuthError> {
        let Some((username, password)) = basic_credentials(headers) else {
            return Ok(None);
        };

        match self.provider.provide_by_user_pass(&username, &password).await {
            Ok(user) => {
                debug!("Basic credentials accepted for user {}", user.id());
                Ok(Some(user))
            }
            Err(ProviderError::Unavailable(msg)) => {
                error!("User provider failed during basic authentication: {}", msg);
                Err(AuthError::Provider(msg))
            }
            Err(e) => {
                warn!("Basic credentials rejected: {}", e);
                Err(e.into())
            }
        }
    }
}
