//! PKCE (RFC 7636) parameter generation
//!
//! A login attempt needs three throwaway values: the code verifier kept
//! locally until the token exchange, its S256 challenge sent with the
//! authorization request, and a CSRF state echoed back on the redirect.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Random bytes behind a code verifier (encodes to 43 characters)
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind a state value (encodes to 32 hex characters)
const STATE_BYTES: usize = 16;

/// The only challenge method this client sends
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE material for a single login attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
}

impl PkceParams {
    /// Generate a fresh verifier, its challenge and a CSRF state
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: generate_state(),
        }
    }
}

/// Base64url-encoded random verifier, 43 characters long
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// BASE64URL(SHA256(verifier))
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// 32 lowercase hex characters
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
