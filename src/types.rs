//! NewType wrappers for the string values that flow through authentication.
//!
//! State tokens, PKCE verifiers, provider tokens and self-issued tokens are
//! all "just strings" on the wire. Wrapping them keeps a verifier from being
//! passed where a challenge is expected, and keeps secret-bearing values out
//! of `Debug` output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
///
/// The `redacted` form prints `Name(***)` from `Debug` so the value never
/// lands in logs through a stray `{:?}`.
macro_rules! newtype_string {
    (@impls $name:ident) => {
        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the wrapped string is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
    (
        $(#[$meta:meta])*
        redacted $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(***)", stringify!($name))
            }
        }

        newtype_string!(@impls $name);
    };
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        newtype_string!(@impls $name);
    };
}

newtype_string!(
    /// Single-use value binding an authorization request to its callback.
    ///
    /// Issued by `login`, consumed by `callback`. Not secret on its own (it
    /// travels through the user agent) but must be unguessable.
    StateToken
);

newtype_string!(
    /// PKCE `code_verifier`: high-entropy secret kept server-side until the
    /// code exchange.
    redacted CodeVerifier
);

newtype_string!(
    /// PKCE `code_challenge`: `BASE64URL(SHA256(verifier))`, sent in the
    /// authorization URL.
    CodeChallenge
);

newtype_string!(
    /// Authorization code returned by the provider on the callback.
    redacted AuthorizationCode
);

newtype_string!(
    /// Access token issued by the upstream identity provider.
    ///
    /// Only used to resolve the application identity at login; it is never
    /// handed to the client.
    redacted ProviderAccessToken
);

newtype_string!(
    /// OIDC ID token (a provider-signed JWT) from the token endpoint.
    redacted IdToken
);

newtype_string!(
    /// Token signed by this service and presented as `Authorization: Bearer`.
    redacted BearerToken
);

newtype_string!(
    /// SHA-256 hex digest of an API key or password for storage and lookup.
    ///
    /// Raw keys are never stored; lookups hash the presented value and
    /// compare digests.
    ApiKeyHash
);

newtype_string!(
    /// Display prefix of an API key (e.g., "ag_abc12345").
    ///
    /// Safe to show to users; it cannot be used to authenticate.
    ApiKeyPrefix
);
