//! PKCE S256 verifier/challenge generation (RFC 7636).
//!
//! The verifier stays on the server, keyed by the state token, until the
//! code exchange. Only the challenge travels through the user agent, so an
//! intercepted authorization code is useless without the verifier.

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

use crate::types::{CodeChallenge, CodeVerifier};

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Number of random bytes behind each verifier (43 base64url characters).
pub const VERIFIER_BYTES: usize = 32;

/// A PKCE verifier together with its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: CodeVerifier,
    pub challenge: CodeChallenge,
}

/// Generate a fresh verifier and its S256 challenge.
pub fn generate() -> PkcePair {
    let verifier = CodeVerifier::new(random_url_safe(VERIFIER_BYTES));
    let challenge = challenge_for(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// `BASE64URL(SHA256(ASCII(verifier)))`, no padding.
pub fn challenge_for(verifier: &CodeVerifier) -> CodeChallenge {
    let digest = Sha256::digest(verifier.as_str().as_bytes());
    CodeChallenge::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
}

/// `len` cryptographically random bytes encoded as base64url without padding.
pub(crate) fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
