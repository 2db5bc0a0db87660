//! HTTP service assembly.
//!
//! [`Service`] owns the strategy registry of one service instance and wraps
//! application routers with identity resolution. [`Service::from_config`]
//! builds the bundled configuration-driven service on top of
//! [`InMemoryUserStore`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{Json, Router, http::StatusCode, routing::get};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::exchange::build_http_client;
use crate::auth::{
    AuthenticatorBuilder, ConfigError, CurrentUser, DEFAULT_AUDIENCE, DEFAULT_ISSUER, Identity,
    InMemoryUserStore, Strategy, StrategyRegistry, StoredUser, UserProvider, protect,
};
use crate::config::{AuthConfig, StrategyConfig};

/// One service instance and its single authentication strategy.
pub struct Service<U: Identity> {
    registry: StrategyRegistry<U>,
}

impl<U: Identity> Default for Service<U> {
    fn default() -> Self {
        Self {
            registry: StrategyRegistry::new(),
        }
    }
}

impl<U: Identity> Service<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start registering a strategy backed by `provider`.
    pub fn authenticate<P>(&mut self, provider: Arc<P>) -> AuthenticatorBuilder<'_, P>
    where
        P: UserProvider<User = U>,
    {
        AuthenticatorBuilder::new(&mut self.registry, provider)
    }

    pub fn strategy(&self) -> Option<&Arc<Strategy<U>>> {
        self.registry.active()
    }

    /// Protect `app` with the active strategy and mount the strategy's own
    /// routes next to it.
    pub fn router(&self, app: Router) -> Result<Router, ConfigError> {
        let strategy = self
            .strategy()
            .ok_or_else(|| ConfigError::Invalid("no authentication strategy registered".into()))?;

        Ok(protect(app, strategy.clone())
            .merge(strategy.router())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            ))
    }
}

impl Service<StoredUser> {
    /// Build the service described by `config`, seeding an in-memory store.
    pub async fn from_config(config: &AuthConfig) -> Result<(Self, InMemoryUserStore)> {
        config.validate()?;

        let mut store = InMemoryUserStore::new();
        if let StrategyConfig::OAuth2(cfg) = &config.strategy
            && let Some(url) = cfg.userinfo()?
        {
            let client = build_http_client(Duration::from_secs(cfg.http_timeout_seconds))?;
            store = store.with_userinfo(url, client);
        }

        for seed in &config.users {
            store.add_user(seed.clone().into()).await?;
        }
        info!("Seeded {} users", config.users.len());

        let mut service = Self::new();
        let builder = service.authenticate(Arc::new(store.clone()));
        match &config.strategy {
            StrategyConfig::Basic => builder.basic()?,
            StrategyConfig::ApiKey(cfg) => builder.api_key_header(cfg.header.clone())?,
            StrategyConfig::Bearer(cfg) => {
                let mut builder = builder.exp_seconds(cfg.exp_seconds);
                if cfg.issuer.is_some() || cfg.audience.is_some() {
                    builder = builder.token_claims(
                        cfg.issuer.as_deref().unwrap_or(DEFAULT_ISSUER),
                        cfg.audience.as_deref().unwrap_or(DEFAULT_AUDIENCE),
                    );
                }
                builder.bearer(cfg.secret.as_bytes(), cfg.base_path.clone())?
            }
            StrategyConfig::OAuth2(cfg) => builder.oauth2(cfg.settings()?, cfg.secret.as_bytes())?,
        };

        Ok((service, store))
    }
}

/// Demo application: a public health check and the caller's identity.
pub fn demo_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/me", get(me))
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn me(CurrentUser(user): CurrentUser<StoredUser>) -> Json<StoredUser> {
    Json(user)
}

/// Serve `router` on `bind` until the process is stopped.
pub async fn serve(router: Router, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthenticationMethod, LoginResponse};
    use axum::body::Body;
    use axum::http::{Request, header};
    use base64::Engine;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app(doc: &str) -> Router {
        let config = AuthConfig::from_json_str(doc).unwrap();
        let (service, _) = Service::from_config(&config).await.unwrap();
        service.router(demo_routes()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_with(uri: &str, name: &str, value: &str) -> Request<Body> {
        Request::get(uri).header(name, value).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_service_end_to_end() {
        let app = app(
            r#"{
                "strategy": {"kind": "bearer", "secret": "server-test-secret-0123456789abc", "exp_seconds": 120},
                "users": [{"username": "alice", "password": "wonderland"}]
            }"#,
        )
        .await;

        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, _) = send(&app, Request::get("/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let login = |password: &str| {
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"username": "alice", "password": password}).to_string(),
                ))
                .unwrap()
        };

        let (status, _) = send(&app, login("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, login("wonderland")).await;
        assert_eq!(status, StatusCode::OK);
        let login: LoginResponse = serde_json::from_value(body).unwrap();
        assert_eq!(login.token_type, "Bearer");
        assert_eq!(login.expires_in, 120);

        let (status, body) = send(
            &app,
            get_with(
                "/me",
                "authorization",
                &format!("Bearer {}", login.token.as_str()),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _) = send(&app, get_with("/me", "authorization", "Bearer not.a.jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_service_custom_header() {
        let app = app(
            r#"{
                "strategy": {"kind": "api_key", "header": "X-Service-Key"},
                "users": [{"username": "svc", "password": "pw", "api_key": "svc-key-1"}]
            }"#,
        )
        .await;

        let (status, body) = send(&app, get_with("/me", "x-service-key", "svc-key-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "svc");

        // The default header is not consulted.
        let (status, _) = send(&app, get_with("/me", "x-api-key", "svc-key-1")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, get_with("/me", "x-service-key", "nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_basic_service() {
        let app = app(
            r#"{
                "strategy": {"kind": "basic"},
                "users": [{"username": "bob", "password": "builder"}]
            }"#,
        )
        .await;
        let encode = |creds: &str| {
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(creds)
            )
        };

        let (status, body) =
            send(&app, get_with("/me", "authorization", &encode("bob:builder"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "bob");

        let (status, _) = send(&app, get_with("/me", "authorization", &encode("bob:nope"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oauth2_service_mounts_flow_routes() {
        let app = app(
            r#"{
                "strategy": {
                    "kind": "oauth2",
                    "client_id": "client-1",
                    "auth_url": "https://idp.example.com/authorize",
                    "token_url": "https://idp.example.com/token",
                    "redirect_url": "https://app.example.com/sso/oauth2/callback",
                    "success_redirect": "/welcome",
                    "secret": "oauth-signing-secret-0123456789ab",
                    "base_path": "/sso",
                    "userinfo_url": "https://idp.example.com/userinfo"
                }
            }"#,
        )
        .await;

        let response = app
            .clone()
            .oneshot(Request::get("/sso/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://idp.example.com/authorize?"));

        let (status, _) = send(&app, Request::get("/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_single_strategy_per_service() {
        let store = Arc::new(InMemoryUserStore::new());
        let mut service = Service::new();
        service.authenticate(store.clone()).basic().unwrap();

        let err = service.authenticate(store).api_key().unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateStrategy(AuthenticationMethod::Basic)
        );
        assert_eq!(
            service.strategy().map(|s| s.method()),
            Some(AuthenticationMethod::Basic)
        );
    }

    #[test]
    fn test_router_requires_strategy() {
        let service: Service<StoredUser> = Service::new();
        assert!(service.router(demo_routes()).is_err());
    }
}
