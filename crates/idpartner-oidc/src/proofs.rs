//! Per-attempt proofs: `state`, `nonce` and the PKCE code verifier (RFC 7636)
//!
//! Proofs are generated once per authorization attempt and must be kept by the
//! caller (typically in a server-side session) until the callback arrives. This
//! crate never stores them.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FederationError, Result};

/// Number of random bytes behind each proof value
pub const PROOF_ENTROPY_BYTES: usize = 64;

/// PKCE code challenge method sent with every authorization request
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// The proof triple for one authorization attempt
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proofs {
    /// CSRF binding between the redirect and the callback
    pub state: String,
    /// Replay protection for the ID token
    pub nonce: String,
    /// PKCE verifier; its S256 challenge is sent at authorization time
    pub code_verifier: String,
}

// Proof values are bearer secrets for the lifetime of the attempt
impl std::fmt::Debug for Proofs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proofs")
            .field("state", &"<redacted>")
            .field("nonce", &"<redacted>")
            .field("code_verifier", &"<redacted>")
            .finish()
    }
}

impl Proofs {
    /// Generate a fresh proof triple from the system RNG
    ///
    /// Each value is 64 random bytes, base64url-encoded without padding
    /// (86 characters).
    pub fn generate() -> Self {
        Self {
            state: random_token(),
            nonce: random_token(),
            code_verifier: random_token(),
        }
    }

    /// S256 code challenge for this attempt's verifier
    pub fn code_challenge(&self) -> String {
        code_challenge(&self.code_verifier)
    }

    /// Reject proofs that cannot drive an authorization attempt
    pub(crate) fn ensure_complete(&self) -> Result<()> {
        for (name, value) in [
            ("state", &self.state),
            ("nonce", &self.nonce),
            ("code_verifier", &self.code_verifier),
        ] {
            if value.is_empty() {
                return Err(FederationError::argument(format!(
                    "The proofs parameter '{name}' is required"
                )));
            }
        }
        Ok(())
    }
}

/// Generate the proofs for a new authorization attempt
pub fn generate_proofs() -> Proofs {
    Proofs::generate()
}

/// Compute `BASE64URL-NOPAD(SHA256(code_verifier))`
pub fn code_challenge(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_token() -> String {
    let mut bytes = [0u8; PROOF_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
