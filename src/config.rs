use anyhow::Context;
use serde::Deserialize;
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;
use uuid::Uuid;

use crate::auth::{
    ConfigError, DEFAULT_API_KEY_HEADER, DEFAULT_BASE_PATH, DEFAULT_TOKEN_TTL_SECONDS, NewUser,
    OAuth2Settings,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "AUTHGATE_CONFIG";

const CONFIG_FILE: &str = "authgate.json";

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Basic,
    ApiKey(ApiKeyConfig),
    Bearer(BearerConfig),
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Config),
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiKeyConfig {
    #[serde(default = "default_api_key_header")]
    pub header: String,
}

#[derive(Deserialize, Clone)]
pub struct BearerConfig {
    pub secret: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_exp_seconds")]
    pub exp_seconds: u64,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub success_redirect: String,
    /// Signs the tokens handed out after a successful login.
    pub secret: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_exp_seconds")]
    pub exp_seconds: u64,
    #[serde(default)]
    pub oidc_issuer: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
    #[serde(default = "default_verifier_ttl_seconds")]
    pub verifier_ttl_seconds: u64,
}

/// A user to seed into the in-memory store.
#[derive(Deserialize, Clone)]
pub struct UserSeed {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_api_key_header() -> String {
    DEFAULT_API_KEY_HEADER.to_string()
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_exp_seconds() -> u64 {
    DEFAULT_TOKEN_TTL_SECONDS
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_state_ttl_seconds() -> u64 {
    300
}

fn default_verifier_ttl_seconds() -> u64 {
    600
}

impl fmt::Debug for BearerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerConfig")
            .field("secret", &"***")
            .field("base_path", &self.base_path)
            .field("exp_seconds", &self.exp_seconds)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("success_redirect", &self.success_redirect)
            .field("secret", &"***")
            .field("base_path", &self.base_path)
            .field("oidc_issuer", &self.oidc_issuer)
            .field("userinfo_url", &self.userinfo_url)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for UserSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSeed")
            .field("username", &self.username)
            .field("id", &self.id)
            .field("email", &self.email)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl From<UserSeed> for NewUser {
    fn from(seed: UserSeed) -> Self {
        NewUser {
            username: seed.username,
            password: seed.password,
            id: seed.id,
            email: seed.email,
            api_key: seed.api_key,
        }
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        message: e.to_string(),
    })
}

fn require_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::MalformedSecret(
            "signing secret must not be empty".into(),
        ));
    }
    Ok(())
}

impl OAuth2Config {
    pub fn userinfo(&self) -> Result<Option<Url>, ConfigError> {
        self.userinfo_url
            .as_deref()
            .map(|u| parse_url("userinfo_url", u))
            .transpose()
    }

    /// Flow settings for [`crate::auth::OAuth2Authenticator`].
    pub fn settings(&self) -> Result<OAuth2Settings, ConfigError> {
        let mut settings = OAuth2Settings::new(
            self.client_id.clone(),
            parse_url("auth_url", &self.auth_url)?,
            parse_url("token_url", &self.token_url)?,
            parse_url("redirect_url", &self.redirect_url)?,
            self.success_redirect.clone(),
        )
        .with_scopes(self.scopes.clone())
        .with_base_path(self.base_path.clone())
        .with_exp_seconds(self.exp_seconds)
        .with_http_timeout(Duration::from_secs(self.http_timeout_seconds))
        .with_ttls(
            Duration::from_secs(self.state_ttl_seconds),
            Duration::from_secs(self.verifier_ttl_seconds),
        );
        if let Some(secret) = &self.client_secret {
            settings = settings.with_client_secret(secret.clone());
        }
        if let Some(issuer) = &self.oidc_issuer {
            settings = settings.with_oidc_issuer(parse_url("oidc_issuer", issuer)?);
        }
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_secret(&self.secret)?;
        self.settings()?.validate()?;
        if self.userinfo()?.is_none() {
            return Err(ConfigError::Invalid(
                "oauth2 requires `userinfo_url` to resolve logins".into(),
            ));
        }
        Ok(())
    }
}

impl AuthConfig {
    /// Parse a configuration document, expanding `${VAR}` in string values.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_str(raw).context("configuration is not valid JSON")?;
        expand_value(&mut value);
        let config: AuthConfig =
            serde_json::from_value(value).context("configuration has an unexpected shape")?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_json_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.strategy {
            StrategyConfig::Basic => {}
            StrategyConfig::ApiKey(cfg) => {
                if http::HeaderName::from_bytes(cfg.header.as_bytes()).is_err() {
                    return Err(ConfigError::Invalid(format!(
                        "`{}` is not a valid header name",
                        cfg.header
                    )));
                }
            }
            StrategyConfig::Bearer(cfg) => {
                require_secret(&cfg.secret)?;
                if cfg.exp_seconds == 0 {
                    return Err(ConfigError::Invalid("exp_seconds must be positive".into()));
                }
            }
            StrategyConfig::OAuth2(cfg) => cfg.validate()?,
        }

        for user in &self.users {
            if user.username.trim().is_empty() {
                return Err(ConfigError::Invalid("user without a username".into()));
            }
        }
        Ok(())
    }
}

/// Locate the configuration file.
///
/// Order: explicit path, `AUTHGATE_CONFIG`, `$XDG_CONFIG_HOME/authgate/authgate.json`,
/// `./authgate.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }

    if let Ok(p) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("authgate").join(CONFIG_FILE);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from(CONFIG_FILE);
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find {} (pass --config, set {} or create ./{})",
        CONFIG_FILE,
        CONFIG_ENV,
        CONFIG_FILE
    ))
}

fn expand_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = expand_env_vars(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(expand_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(expand_value),
        _ => {}
    }
}

/// Replace `${NAME}` with the value of `NAME`. Unset variables and an
/// unterminated `${` are kept as written.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match env::var(name) {
            Ok(val) => out.push_str(&val),
            Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}
