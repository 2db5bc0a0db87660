//! Request-scoped authentication result.

use crate::auth::identity::Identity;
use crate::auth::strategy::AuthenticationMethod;

/// What the active strategy resolved for one request.
///
/// Inserted into request extensions by the authentication middleware and
/// read back by [`CurrentUser`](crate::auth::CurrentUser) and
/// [`MaybeUser`](crate::auth::MaybeUser). Immutable once created.
#[derive(Debug, Clone)]
pub struct AuthContext<U> {
    /// Resolved identity, `None` when the request carried no credentials.
    user: Option<U>,
    /// Strategy that handled the request.
    method: AuthenticationMethod,
    /// Client IP address (for audit logging)
    ip_address: Option<String>,
    /// Client user agent (for audit logging)
    user_agent: Option<String>,
}

impl<U: Identity> AuthContext<U> {
    pub fn authenticated(user: U, method: AuthenticationMethod) -> Self {
        Self {
            user: Some(user),
            method,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn anonymous(method: AuthenticationMethod) -> Self {
        Self {
            user: None,
            method,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set client metadata for audit logging.
    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn user(&self) -> Option<&U> {
        self.user.as_ref()
    }

    pub fn into_user(self) -> Option<U> {
        self.user
    }

    pub fn method(&self) -> AuthenticationMethod {
        self.method
    }

    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Short description for log lines: the user id or `anonymous`.
    pub fn display(&self) -> String {
        match &self.user {
            Some(user) => user.id().to_string(),
            None => "anonymous".to_string(),
        }
    }
}
