//! In-memory user store.
//!
//! A ready-made [`UserProvider`] for small deployments and the bundled
//! binary. Passwords are kept as bcrypt hashes and API keys as SHA-256
//! digests. OAuth2
//! logins are resolved by calling the provider's userinfo endpoint with the
//! access token and mapping its `sub` to a local user.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::extractor::hash_api_key;
use crate::auth::identity::{Identity, OAuth2UserProvider, ProviderError, UserProvider};
use crate::types::{ApiKeyHash, ProviderAccessToken};

/// External-identity provider name recorded for OAuth2 logins.
pub const OAUTH2_PROVIDER: &str = "oauth2";

/// A user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredUser {
    pub id: Uuid,
    /// Local login name, for users that can sign in with a password.
    pub username: Option<String>,
    /// Subject at the external identity provider.
    pub external_id: Option<String>,
    /// Which external identity provider `external_id` belongs to.
    pub provider: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Identity for StoredUser {
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Seed data for a password user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub id: Option<Uuid>,
    pub email: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Default)]
struct Users {
    by_id: HashMap<Uuid, StoredUser>,
    /// username -> (user, bcrypt hash)
    passwords: HashMap<String, (Uuid, String)>,
    api_keys: HashMap<ApiKeyHash, Uuid>,
    /// (provider, external_id) -> user
    external: HashMap<(String, String), Uuid>,
}

/// Claims returned by an OIDC userinfo endpoint.
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

struct UserinfoEndpoint {
    url: Url,
    client: reqwest::Client,
}

/// Thread-safe in-memory [`UserProvider`].
#[derive(Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<Users>>,
    userinfo: Option<Arc<UserinfoEndpoint>>,
    password_cost: u32,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self {
            users: Arc::default(),
            userinfo: None,
            password_cost: DEFAULT_COST,
        }
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// bcrypt cost for passwords added from now on.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    /// Resolve OAuth2 logins through `url`.
    pub fn with_userinfo(mut self, url: Url, client: reqwest::Client) -> Self {
        self.userinfo = Some(Arc::new(UserinfoEndpoint { url, client }));
        self
    }

    /// Add a password user, optionally with an API key.
    pub async fn add_user(&self, new_user: NewUser) -> Result<StoredUser> {
        if new_user.username.is_empty() {
            bail!("username must not be empty");
        }

        let password_hash = hash(&new_user.password, self.password_cost)
            .with_context(|| format!("failed to hash password for `{}`", new_user.username))?;

        let mut users = self.users.write().await;
        if users.passwords.contains_key(&new_user.username) {
            bail!("user `{}` already exists", new_user.username);
        }

        let id = new_user.id.unwrap_or_else(Uuid::new_v4);
        if users.by_id.contains_key(&id) {
            bail!("user id {} already exists", id);
        }

        let api_key_hash = new_user.api_key.as_deref().map(hash_api_key);
        if let Some(key_hash) = &api_key_hash
            && users.api_keys.contains_key(key_hash)
        {
            bail!("API key for `{}` is already assigned", new_user.username);
        }

        let now = Utc::now();
        let user = StoredUser {
            id,
            username: Some(new_user.username.clone()),
            external_id: None,
            provider: None,
            email: new_user.email,
            display_name: Some(new_user.username.clone()),
            is_active: true,
            created_at: now,
            last_seen_at: now,
        };

        users.by_id.insert(id, user.clone());
        users
            .passwords
            .insert(new_user.username, (id, password_hash));
        if let Some(key_hash) = api_key_hash {
            users.api_keys.insert(key_hash, id);
        }

        debug!("Added user {}", id);
        Ok(user)
    }

    /// Attach an API key to an existing user.
    pub async fn add_api_key(&self, user_id: Uuid, api_key: &str) -> Result<()> {
        let mut users = self.users.write().await;
        if !users.by_id.contains_key(&user_id) {
            bail!("unknown user {}", user_id);
        }
        users.api_keys.insert(hash_api_key(api_key), user_id);
        Ok(())
    }

    /// Get or create a user by external identity.
    ///
    /// Existing users get their `last_seen_at` refreshed.
    pub async fn get_or_create_user(
        &self,
        external_id: &str,
        provider: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> StoredUser {
        let mut users = self.users.write().await;
        let key = (provider.to_string(), external_id.to_string());
        let now = Utc::now();

        if let Some(id) = users.external.get(&key).copied()
            && let Some(user) = users.by_id.get_mut(&id)
        {
            user.last_seen_at = now;
            return user.clone();
        }

        let user = StoredUser {
            id: Uuid::new_v4(),
            username: None,
            external_id: Some(external_id.to_string()),
            provider: Some(provider.to_string()),
            email: email.map(str::to_string),
            display_name: display_name.map(str::to_string),
            is_active: true,
            created_at: now,
            last_seen_at: now,
        };
        users.external.insert(key, user.id);
        users.by_id.insert(user.id, user.clone());

        info!("Created user {} for {} identity", user.id, provider);
        user
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Option<StoredUser> {
        self.users.read().await.by_id.get(&id).cloned()
    }

    pub async fn deactivate_user(&self, id: Uuid) -> Result<()> {
        self.set_active(id, false).await
    }

    pub async fn reactivate_user(&self, id: Uuid) -> Result<()> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut users = self.users.write().await;
        match users.by_id.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                Ok(())
            }
            None => bail!("unknown user {}", id),
        }
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.by_id.len()
    }

    async fn active_user(&self, id: Uuid) -> Option<StoredUser> {
        self.get_user_by_id(id).await.filter(|u| u.is_active)
    }
}

#[async_trait]
impl UserProvider for InMemoryUserStore {
    type User = StoredUser;

    async fn provide_by_user_pass(
        &self,
        username: &str,
        password: &str,
    ) -> Result<StoredUser, ProviderError> {
        let entry = self.users.read().await.passwords.get(username).cloned();
        let Some((id, password_hash)) = entry else {
            return Err(ProviderError::InvalidCredentials);
        };

        match verify(password, &password_hash) {
            Ok(true) => {}
            Ok(false) => return Err(ProviderError::InvalidCredentials),
            Err(e) => {
                error!("Password verification error for `{}`: {}", username, e);
                return Err(ProviderError::Unavailable(e.to_string()));
            }
        }
        self.active_user(id)
            .await
            .ok_or(ProviderError::InvalidCredentials)
    }

    async fn provide_by_id(&self, id: Uuid) -> Result<StoredUser, ProviderError> {
        self.active_user(id).await.ok_or(ProviderError::NotFound)
    }

    async fn provide_by_api_key(&self, api_key: &str) -> Result<StoredUser, ProviderError> {
        let hash = hash_api_key(api_key);
        let id = self.users.read().await.api_keys.get(&hash).copied();
        match id {
            Some(id) => self
                .active_user(id)
                .await
                .ok_or(ProviderError::InvalidCredentials),
            None => Err(ProviderError::InvalidCredentials),
        }
    }
}

#[async_trait]
impl OAuth2UserProvider for InMemoryUserStore {
    async fn provide_for_login(
        &self,
        access_token: &ProviderAccessToken,
    ) -> Result<Option<StoredUser>, ProviderError> {
        let Some(userinfo) = &self.userinfo else {
            return Err(ProviderError::Unavailable(
                "no userinfo endpoint configured".to_string(),
            ));
        };

        let response = userinfo
            .client
            .get(userinfo.url.clone())
            .bearer_auth(access_token.as_str())
            .send()
            .await
            .map_err(|e| {
                error!("Userinfo endpoint unreachable: {}", e);
                ProviderError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            warn!("Userinfo endpoint returned {}", response.status());
            return Ok(None);
        }

        let info: UserInfo = response.json().await.map_err(|e| {
            error!("Userinfo response is not valid JSON: {}", e);
            ProviderError::Unavailable(e.to_string())
        })?;

        let user = self
            .get_or_create_user(
                &info.sub,
                OAUTH2_PROVIDER,
                info.email.as_deref(),
                info.name.as_deref(),
            )
            .await;

        Ok(user.is_active.then_some(user))
    }
}
