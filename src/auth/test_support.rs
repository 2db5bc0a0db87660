//! Shared fixtures for the auth tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::exchange::{CodeExchanger, ExchangeError, TokenResponse};
use crate::auth::identity::{Identity, OAuth2UserProvider, ProviderError, UserProvider};
use crate::auth::oidc::{IdTokenClaims, IdTokenValidator, OidcError};
use crate::types::{AuthorizationCode, CodeVerifier, IdToken, ProviderAccessToken};

pub const TEST_SECRET: &[u8] = b"test-signing-secret-0123456789ab";

/// 2048-bit RSA key used to sign ID tokens in tests.
pub const TEST_RSA_PEM: &str = include_str!("testdata/oidc_rsa.pem");

/// JWK components of [`TEST_RSA_PEM`].
pub const TEST_RSA_N: &str = "sO7g3kpS2RJ2uEDOFKEH68UUPTJreXWBS9FLlWhCNwRva6Mm3D4dGg5v9FFDl6jwiLGb_7KcN4jFDuOsco2dLN1yG2U9yCEzjsJ-pWeNt3F29Rv2mgGq0vC9Ft82D3mATfQh6KWrSTy6ONk8DPqiCqM42wE41P2sIUV73d2nQZIF82y5i1G939dJVTzvDbRR-WNmZt-zxAjWvU_XLVuj3VRxQLqP7VmV5j8aGA_wEKsCJrNYIHHw98zDuxcREHQ3CPiPus504bYC4jQlk_LgvXoFc8FknMWUJtFnjgF0TmKKMrxZxIvLQgNs27QOckVGpLvn-7VgKIm4q-8sMmF2Lw";
pub const TEST_RSA_E: &str = "AQAB";

/// Base URL of a local port nothing listens on, so connections are refused.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUser {
    pub id: Uuid,
    pub name: String,
}

impl Identity for TestUser {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Default)]
struct ProviderState {
    users: HashMap<Uuid, TestUser>,
    passwords: HashMap<String, (String, Uuid)>,
    api_keys: HashMap<String, Uuid>,
    logins: HashMap<String, Uuid>,
    failure: Option<String>,
    login_calls: usize,
}

/// In-memory [`UserProvider`] with switchable failure.
#[derive(Clone, Default)]
pub struct TestProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl TestProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str) -> TestUser {
        let user = TestUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user.id, user.clone());
        user
    }

    pub fn add_user(&self, username: &str, password: &str) -> TestUser {
        let user = self.insert(username);
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(username.to_string(), (password.to_string(), user.id));
        user
    }

    pub fn add_api_key(&self, key: &str) -> TestUser {
        let user = self.insert("api");
        self.state
            .lock()
            .unwrap()
            .api_keys
            .insert(key.to_string(), user.id);
        user
    }

    /// Map a provider access token to a fresh user.
    pub fn add_login(&self, access_token: &str) -> TestUser {
        let user = self.insert("oauth");
        self.state
            .lock()
            .unwrap()
            .logins
            .insert(access_token.to_string(), user.id);
        user
    }

    /// Make every subsequent call fail as unavailable.
    pub fn fail_with(&self, msg: &str) {
        self.state.lock().unwrap().failure = Some(msg.to_string());
    }

    pub fn login_calls(&self) -> usize {
        self.state.lock().unwrap().login_calls
    }

    fn check(&self) -> Result<(), ProviderError> {
        match &self.state.lock().unwrap().failure {
            Some(msg) => Err(ProviderError::Unavailable(msg.clone())),
            None => Ok(()),
        }
    }

    fn user(&self, id: Uuid) -> Option<TestUser> {
        self.state.lock().unwrap().users.get(&id).cloned()
    }
}

#[async_trait]
impl UserProvider for TestProvider {
    type User = TestUser;

    async fn provide_by_user_pass(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TestUser, ProviderError> {
        self.check()?;
        let entry = self.state.lock().unwrap().passwords.get(username).cloned();
        match entry {
            Some((expected, id)) if expected == password => {
                self.user(id).ok_or(ProviderError::NotFound)
            }
            _ => Err(ProviderError::InvalidCredentials),
        }
    }

    async fn provide_by_id(&self, id: Uuid) -> Result<TestUser, ProviderError> {
        self.check()?;
        self.user(id).ok_or(ProviderError::NotFound)
    }

    async fn provide_by_api_key(&self, api_key: &str) -> Result<TestUser, ProviderError> {
        self.check()?;
        let id = self.state.lock().unwrap().api_keys.get(api_key).copied();
        id.and_then(|id| self.user(id))
            .ok_or(ProviderError::InvalidCredentials)
    }
}

#[async_trait]
impl OAuth2UserProvider for TestProvider {
    async fn provide_for_login(
        &self,
        access_token: &ProviderAccessToken,
    ) -> Result<Option<TestUser>, ProviderError> {
        self.state.lock().unwrap().login_calls += 1;
        self.check()?;
        let id = self
            .state
            .lock()
            .unwrap()
            .logins
            .get(access_token.as_str())
            .copied();
        Ok(id.and_then(|id| self.user(id)))
    }
}

/// Code exchanger answering from a fixed table.
#[derive(Clone, Default)]
pub struct StubExchanger {
    codes: Arc<Mutex<HashMap<String, Result<TokenResponse, ExchangeError>>>>,
    calls: Arc<AtomicUsize>,
    verifiers: Arc<Mutex<Vec<String>>>,
}

impl StubExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, code: &str, access_token: &str, id_token: Option<&str>) {
        self.codes.lock().unwrap().insert(
            code.to_string(),
            Ok(TokenResponse {
                access_token: ProviderAccessToken::new(access_token),
                token_type: Some("Bearer".into()),
                expires_in: Some(3600),
                refresh_token: None,
                scope: None,
                id_token: id_token.map(IdToken::new),
            }),
        );
    }

    pub fn fail(&self, code: &str, err: ExchangeError) {
        self.codes
            .lock()
            .unwrap()
            .insert(code.to_string(), Err(err));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Verifiers presented so far, in call order.
    pub fn verifiers(&self) -> Vec<String> {
        self.verifiers.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeExchanger for StubExchanger {
    async fn exchange(
        &self,
        code: &AuthorizationCode,
        verifier: &CodeVerifier,
    ) -> Result<TokenResponse, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verifiers
            .lock()
            .unwrap()
            .push(verifier.as_str().to_string());
        self.codes
            .lock()
            .unwrap()
            .get(code.as_str())
            .cloned()
            .unwrap_or_else(|| Err(ExchangeError::Rejected("invalid_grant".into())))
    }
}

/// ID-token validator accepting exactly one token value.
pub struct StubIdTokenValidator {
    pub accept: String,
}

#[async_trait]
impl IdTokenValidator for StubIdTokenValidator {
    async fn validate(&self, id_token: &IdToken) -> Result<IdTokenClaims, OidcError> {
        if id_token.as_str() == self.accept {
            Ok(IdTokenClaims {
                iss: "https://idp.example.com".into(),
                sub: "provider-user".into(),
                exp: chrono::Utc::now().timestamp() + 300,
                iat: None,
                nonce: None,
                email: None,
                email_verified: None,
                name: None,
            })
        } else {
            Err(OidcError::Invalid("signature mismatch".into()))
        }
    }
}
