//! Identity-resolution middleware.
//!
//! Runs the active strategy for every request of the wrapped router and
//! stores the outcome as an [`AuthContext`] in the request extensions.
//! Anonymous requests pass through; handlers decide with
//! [`CurrentUser`](crate::auth::CurrentUser) or
//! [`MaybeUser`](crate::auth::MaybeUser) whether that is acceptable.
//! Presented-but-invalid credentials are answered here with the error's
//! status and never reach the handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use http::header::USER_AGENT;
use tracing::debug;

use crate::auth::context::AuthContext;
use crate::auth::extractor::header_value;
use crate::auth::identity::Identity;
use crate::auth::strategy::Strategy;

const FORWARDED_FOR: &str = "X-Forwarded-For";

/// Wrap every route of `router` with identity resolution.
pub fn protect<U: Identity>(router: Router, strategy: Arc<Strategy<U>>) -> Router {
    router.layer(from_fn_with_state(strategy, authenticate_request::<U>))
}

pub async fn authenticate_request<U: Identity>(
    State(strategy): State<Arc<Strategy<U>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let (ip_address, user_agent) = client_info(&request);
    let method = strategy.method();

    let ctx = match strategy.authenticate(request.headers()).await {
        Ok(Some(user)) => AuthContext::authenticated(user, method),
        Ok(None) => AuthContext::anonymous(method),
        Err(err) => {
            debug!(
                "Authentication failed for {} {} from {}: {}",
                request.method(),
                request.uri().path(),
                ip_address.as_deref().unwrap_or("unknown"),
                err
            );
            return err.into_response();
        }
    };

    let ctx = ctx.with_client_info(ip_address, user_agent);
    debug!(
        "{} {} as {}",
        request.method(),
        request.uri().path(),
        ctx.display()
    );
    request.extensions_mut().insert(ctx);
    next.run(request).await
}

fn client_info(request: &Request) -> (Option<String>, Option<String>) {
    let forwarded = header_value(request.headers(), FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let ip_address = forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    });
    let user_agent = header_value(request.headers(), USER_AGENT.as_str()).map(str::to_string);
    (ip_address, user_agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_key::ApiKeyAuthenticator;
    use crate::auth::extractor::{CurrentUser, MaybeUser};
    use crate::auth::test_support::{TestProvider, TestUser};
    use axum::body::Body;
    use axum::routing::get;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn me(CurrentUser(user): CurrentUser<TestUser>) -> String {
        user.name
    }

    async fn maybe(MaybeUser(user): MaybeUser<TestUser>) -> String {
        user.map(|u| u.name).unwrap_or_else(|| "anonymous".into())
    }

    async fn client(ctx: axum::Extension<AuthContext<TestUser>>) -> String {
        format!(
            "{}|{}",
            ctx.ip_address().unwrap_or("-"),
            ctx.user_agent().unwrap_or("-")
        )
    }

    fn app() -> Router {
        let provider = TestProvider::new();
        provider.add_api_key("good-key");
        let strategy = Arc::new(Strategy::ApiKey(ApiKeyAuthenticator::new(Arc::new(
            provider,
        ))));
        protect(
            Router::new()
                .route("/me", get(me))
                .route("/maybe", get(maybe))
                .route("/client", get(client)),
            strategy,
        )
    }

    async fn get_body(app: Router, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut builder = http::Request::get(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_authenticated_request_reaches_handler() {
        let (status, body) = get_body(app(), "/me", &[("x-api-key", "good-key")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "api");
    }

    #[tokio::test]
    async fn test_anonymous_request() {
        let (status, body) = get_body(app(), "/me", &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Unauthorized"));

        let (status, body) = get_body(app(), "/maybe", &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
    }

    #[tokio::test]
    async fn test_invalid_credentials_short_circuit() {
        let (status, body) = get_body(app(), "/maybe", &[("x-api-key", "bad-key")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Invalid credentials"));
    }

    #[tokio::test]
    async fn test_client_info_recorded() {
        let (_, body) = get_body(
            app(),
            "/client",
            &[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("user-agent", "curl/8.0"),
            ],
        )
        .await;
        assert_eq!(body, "203.0.113.7|curl/8.0");
    }
}
