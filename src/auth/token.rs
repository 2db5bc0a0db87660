//! Self-issued bearer tokens (HS256 JWTs).
//!
//! The service signs its own tokens after a successful login and only ever
//! accepts tokens it signed itself. Provider access tokens are never
//! forwarded to clients.

use std::fmt;

use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::error::ConfigError;
use crate::types::BearerToken;

/// Default token lifetime: one day.
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 86400;

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "authgate";

/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "authgate-service";

/// The only header algorithm accepted on validation.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by every self-issued token. All are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

/// Why a token could not be issued or was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a structurally valid JWT.
    Malformed(String),
    /// The header names an algorithm other than HS256.
    AlgorithmMismatch(String),
    InvalidSignature,
    Expired,
    NotYetValid,
    /// Issuer, audience or another required claim is wrong or missing.
    InvalidClaims(String),
    /// `sub` is not a valid identity key.
    InvalidSubject(String),
    /// Signing failed.
    Signing(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Self::AlgorithmMismatch(alg) => write!(f, "Unexpected signing algorithm: {}", alg),
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::Expired => write!(f, "Token expired"),
            Self::NotYetValid => write!(f, "Token not yet valid"),
            Self::InvalidClaims(msg) => write!(f, "Invalid claims: {}", msg),
            Self::InvalidSubject(sub) => write!(f, "Invalid subject: {}", sub),
            Self::Signing(msg) => write!(f, "Signing failed: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

/// Signs and validates bearer tokens with a process-wide HMAC secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Create an issuer for `secret` with the default `iss`/`aud` values.
    pub fn new(secret: &[u8]) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MalformedSecret("secret is empty".to_string()));
        }
        if secret.len() < 32 {
            warn!(
                "Signing secret is {} bytes; at least 32 is recommended for HS256",
                secret.len()
            );
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        })
    }

    /// Override the `iss` and `aud` claims.
    pub fn with_claims(mut self, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self.audience = audience.into();
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sign a token for `subject` valid for `ttl_seconds` from now.
    pub fn issue(&self, subject: Uuid, ttl_seconds: u64) -> Result<BearerToken, TokenError> {
        self.issue_at(subject, ttl_seconds, chrono::Utc::now().timestamp())
    }

    /// Sign a token as if the current time were `now` (seconds since epoch).
    pub(crate) fn issue_at(
        &self,
        subject: Uuid,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<BearerToken, TokenError> {
        let ttl = i64::try_from(ttl_seconds)
            .map_err(|_| TokenError::Signing(format!("ttl out of range: {}", ttl_seconds)))?;
        let exp = now
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Signing(format!("ttl out of range: {}", ttl_seconds)))?;

        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            iat: now,
            nbf: now,
            exp,
            jti: Uuid::new_v4().to_string(),
        };

        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<BearerToken, TokenError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map(BearerToken::new)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate `token` and return the identity key in its `sub` claim.
    pub fn validate(&self, token: &str) -> Result<Uuid, TokenError> {
        self.validate_claims(token).and_then(|claims| {
            Uuid::parse_str(&claims.sub).map_err(|_| TokenError::InvalidSubject(claims.sub))
        })
    }

    /// Validate `token` and return its full claim set.
    pub fn validate_claims(&self, token: &str) -> Result<Claims, TokenError> {
        // Reject algorithm confusion (`none`, RS*, other HMAC sizes) before
        // any key is involved.
        let alg = header_algorithm(token)?;
        if alg != "HS256" {
            warn!("Rejected bearer token signed with {}", alg);
            return Err(TokenError::AlgorithmMismatch(alg));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                ErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch(e.to_string()),
                ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::MissingRequiredClaim(_) => TokenError::InvalidClaims(e.to_string()),
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;

        if data.claims.jti.is_empty() {
            return Err(TokenError::InvalidClaims("empty jti".to_string()));
        }

        debug!("Bearer token verified for subject {}", data.claims.sub);
        Ok(data.claims)
    }
}

/// Read the `alg` field of a JWT header without trusting anything else.
fn header_algorithm(token: &str) -> Result<String, TokenError> {
    let header_segment = token
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TokenError::Malformed("missing header".to_string()))?;

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|e| TokenError::Malformed(format!("header is not base64url: {}", e)))?;

    let header: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("header is not JSON: {}", e)))?;

    header
        .get("alg")
        .and_then(|alg| alg.as_str())
        .map(str::to_string)
        .ok_or_else(|| TokenError::Malformed("header has no alg".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET).unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn b64(value: &serde_json::Value) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(value).unwrap())
    }

    fn claims_for(sub: &str, now: i64) -> serde_json::Value {
        serde_json::json!({
            "iss": DEFAULT_ISSUER,
            "aud": DEFAULT_AUDIENCE,
            "sub": sub,
            "iat": now,
            "nbf": now,
            "exp": now + 3600,
            "jti": "abc",
        })
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            TokenIssuer::new(b""),
            Err(ConfigError::MalformedSecret(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let issuer = issuer();
        for _ in 0..8 {
            let id = Uuid::new_v4();
            let token = issuer.issue(id, 60).unwrap();
            assert_eq!(issuer.validate(token.as_str()).unwrap(), id);
        }
    }

    #[test]
    fn test_claims_are_fully_populated() {
        let issuer = issuer().with_claims("my-iss", "my-aud");
        let id = Uuid::new_v4();
        let issued_at = now();
        let token = issuer.issue_at(id, 7200, issued_at).unwrap();

        let claims = issuer.validate_claims(token.as_str()).unwrap();
        assert_eq!(claims.iss, "my-iss");
        assert_eq!(claims.aud, "my-aud");
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.iat, issued_at);
        assert_eq!(claims.nbf, issued_at);
        assert_eq!(claims.exp, issued_at + 7200);
        assert!(Uuid::parse_str(&claims.jti).is_ok());
    }

    #[test]
    fn test_jti_is_unique_per_token() {
        let issuer = issuer();
        let id = Uuid::new_v4();
        let a = issuer.validate_claims(issuer.issue(id, 60).unwrap().as_str()).unwrap();
        let b = issuer.validate_claims(issuer.issue(id, 60).unwrap().as_str()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issuer().issue(Uuid::new_v4(), 60).unwrap();
        let other = TokenIssuer::new(b"another-secret-another-secret-xx").unwrap();
        assert_eq!(
            other.validate(token.as_str()),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let issuer = issuer();
        let token = issuer.issue(Uuid::new_v4(), 60).unwrap();
        let parts: Vec<&str> = token.as_str().split('.').collect();

        let forged_payload = b64(&claims_for(&Uuid::new_v4().to_string(), now()));
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(issuer.validate(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(Uuid::new_v4(), 10, now() - 1000).unwrap();
        assert_eq!(issuer.validate(token.as_str()), Err(TokenError::Expired));
    }

    #[test]
    fn test_not_yet_valid_token_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(Uuid::new_v4(), 3600, now() + 600).unwrap();
        assert_eq!(issuer.validate(token.as_str()), Err(TokenError::NotYetValid));
    }

    #[test]
    fn test_alg_none_rejected() {
        let header = b64(&serde_json::json!({ "alg": "none", "typ": "JWT" }));
        let payload = b64(&claims_for(&Uuid::new_v4().to_string(), now()));
        let token = format!("{}.{}.", header, payload);

        assert_eq!(
            issuer().validate(&token),
            Err(TokenError::AlgorithmMismatch("none".to_string()))
        );
    }

    #[test]
    fn test_rsa_header_rejected() {
        // A forged token claiming RS256 with an HMAC-computed signature.
        let header = b64(&serde_json::json!({ "alg": "RS256", "typ": "JWT" }));
        let payload = b64(&claims_for(&Uuid::new_v4().to_string(), now()));
        let token = format!("{}.{}.c2lnbmF0dXJl", header, payload);

        assert_eq!(
            issuer().validate(&token),
            Err(TokenError::AlgorithmMismatch("RS256".to_string()))
        );
    }

    #[test]
    fn test_other_hmac_size_rejected() {
        let claims: Claims =
            serde_json::from_value(claims_for(&Uuid::new_v4().to_string(), now())).unwrap();
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(
            issuer().validate(&token),
            Err(TokenError::AlgorithmMismatch("HS512".to_string()))
        );
    }

    #[test]
    fn test_missing_claim_rejected() {
        let mut value = claims_for(&Uuid::new_v4().to_string(), now());
        value.as_object_mut().unwrap().remove("nbf");
        let token = encode(
            &Header::new(Algorithm::HS256),
            &value,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(issuer().validate(&token).is_err());
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let token = issuer()
            .with_claims(DEFAULT_ISSUER, "someone-else")
            .issue(Uuid::new_v4(), 60)
            .unwrap();
        assert!(matches!(
            issuer().validate(token.as_str()),
            Err(TokenError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let claims: Claims = serde_json::from_value(claims_for("not-a-uuid", now())).unwrap();
        let token = issuer().sign(&claims).unwrap();
        assert_eq!(
            issuer().validate(token.as_str()),
            Err(TokenError::InvalidSubject("not-a-uuid".to_string()))
        );
    }

    #[test]
    fn test_garbage_rejected() {
        let issuer = issuer();
        assert!(matches!(issuer.validate(""), Err(TokenError::Malformed(_))));
        assert!(matches!(
            issuer.validate("not.a.jwt"),
            Err(TokenError::Malformed(_))
        ));
    }
}
