//! The boundary between the authentication engine and the application's users.
//!
//! The engine never owns user records. It hands credentials to a
//! [`UserProvider`] and gets back an application-defined [`Identity`].

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::ProviderAccessToken;

/// An application-defined user that can be referenced by a stable id.
///
/// The id becomes the `sub` claim of self-issued tokens and is what
/// [`UserProvider::provide_by_id`] receives back on later requests.
pub trait Identity: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;
}

/// Failures from the user resolution boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Wrong password, unknown API key, etc.
    InvalidCredentials,
    /// No user exists for the given id.
    NotFound,
    /// The backing store could not answer.
    Unavailable(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::NotFound => write!(f, "User not found"),
            Self::Unavailable(msg) => write!(f, "User provider unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Resolves credentials into application users.
#[async_trait]
pub trait UserProvider: Send + Sync + 'static {
    type User: Identity;

    /// Resolve a user from a username/password pair (HTTP Basic, bearer login).
    async fn provide_by_user_pass(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Self::User, ProviderError>;

    /// Resolve a user from the subject of a validated bearer token.
    async fn provide_by_id(&self, id: Uuid) -> Result<Self::User, ProviderError>;

    /// Resolve a user from an API key.
    async fn provide_by_api_key(&self, api_key: &str) -> Result<Self::User, ProviderError>;
}

/// Additional resolution step required by the OAuth2 strategy.
#[async_trait]
pub trait OAuth2UserProvider: UserProvider {
    /// Map the provider's access token to an application user.
    ///
    /// `Ok(None)` means the provider vouched for someone this application
    /// does not know; the login is aborted with "user not found".
    async fn provide_for_login(
        &self,
        access_token: &ProviderAccessToken,
    ) -> Result<Option<Self::User>, ProviderError>;
}
