//! JOSE capability - JWS/JWE/JWK operations the protocol engine calls into
//!
//! The engine never touches raw key material directly; everything goes through
//! the [`Jose`] trait so the cryptography stays in audited libraries:
//!
//! - `jsonwebtoken` parses JWS headers and verifies response signatures
//! - `josekit` signs request objects and client assertions from a private JWK,
//!   decrypts RSA-OAEP / A256CBC-HS512 responses and parses JWKs
//!
//! [`StandardJose`] wires both together and is what
//! [`FederationClient::new`](crate::FederationClient::new) uses.

use std::str::FromStr;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use josekit::jwe::{self, RSA_OAEP};
use josekit::jws::{JwsHeader, PS256};
use josekit::jwt::{self, JwtPayload};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub use josekit::jwk::Jwk;

/// Signature algorithm for request objects and client assertions
pub const SIGNING_ALG: &str = "PS256";
/// Key management algorithm for encrypted responses
pub const ENCRYPTION_ALG: &str = "RSA-OAEP";
/// Content encryption algorithm for encrypted responses
pub const ENCRYPTION_ENC: &str = "A256CBC-HS512";

/// Clock skew tolerated when a verified response carries `exp`/`nbf`
const CLOCK_SKEW_LEEWAY_SECS: u64 = 60;

/// Algorithms accepted on provider-signed responses
const VERIFICATION_ALGORITHMS: &[Algorithm] = &[
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Public members kept for every key type
const COMMON_PUBLIC_MEMBERS: &[&str] = &["kty", "kid", "use", "alg"];

/// JOSE operation errors
#[derive(Debug, Error)]
pub enum JoseError {
    /// Key is unusable for the requested operation
    #[error("Invalid key: {0}")]
    Key(String),

    /// Token could not be signed
    #[error("Signing failed: {0}")]
    Sign(String),

    /// Signature or claim validation failed
    #[error("Verification failed: {0}")]
    Verify(String),

    /// Encrypted token could not be decrypted
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Input is not a well-formed token or key set
    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// Signature algorithms this client produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    /// RSASSA-PSS using SHA-256 and MGF1 with SHA-256
    #[default]
    Ps256,
}

/// Injected JOSE capability
pub trait Jose: Send + Sync + std::fmt::Debug {
    /// Sign `claims` as a compact JWT with `key`
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Key`] if the key cannot sign with `alg`, or
    /// [`JoseError::Sign`] if the claims are not a valid JWT payload.
    fn sign_jwt(
        &self,
        claims: &Map<String, Value>,
        key: &Jwk,
        alg: SigningAlgorithm,
    ) -> Result<String, JoseError>;

    /// Verify a compact JWS with `key` and return its claims
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Verify`] on signature mismatch or expired token,
    /// [`JoseError::Malformed`] if `token` is not a JWS.
    fn verify_jws(&self, token: &str, key: &Jwk) -> Result<Map<String, Value>, JoseError>;

    /// Decrypt a compact JWE with `key` and return the plaintext (a nested JWS)
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Decrypt`] if decryption or authentication fails.
    fn decrypt_jwe(&self, token: &str, key: &Jwk) -> Result<String, JoseError>;

    /// Parse a JWK set document, skipping members that are not valid JWKs
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Malformed`] if the document has no `keys` array.
    fn parse_jwk_set(&self, json: &[u8]) -> Result<Vec<Jwk>, JoseError>;

    /// Derive the public JWK of `key`, dropping every private member
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Key`] for key types without a public form (`oct`).
    fn public_from_private(&self, key: &Jwk) -> Result<Jwk, JoseError>;

    /// Read the `kid` of a compact JWS header without verifying anything
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::Malformed`] if the header cannot be decoded.
    fn peek_key_id(&self, token: &str) -> Result<Option<String>, JoseError>;
}

/// Default JOSE backend (`jsonwebtoken` + `josekit`)
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardJose;

impl Jose for StandardJose {
    fn sign_jwt(
        &self,
        claims: &Map<String, Value>,
        key: &Jwk,
        alg: SigningAlgorithm,
    ) -> Result<String, JoseError> {
        let signer = match alg {
            SigningAlgorithm::Ps256 => PS256.signer_from_jwk(key),
        }
        .map_err(|e| JoseError::Key(e.to_string()))?;

        let mut header = JwsHeader::new();
        header.set_token_type("JWT");
        if let Some(kid) = key.key_id() {
            header.set_key_id(kid);
        }

        let payload =
            JwtPayload::from_map(claims.clone()).map_err(|e| JoseError::Sign(e.to_string()))?;

        jwt::encode_with_signer(&payload, &header, &signer)
            .map_err(|e| JoseError::Sign(e.to_string()))
    }

    fn verify_jws(&self, token: &str, key: &Jwk) -> Result<Map<String, Value>, JoseError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| JoseError::Malformed(e.to_string()))?;

        if !VERIFICATION_ALGORITHMS.contains(&header.alg) {
            return Err(JoseError::Verify(format!(
                "Unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        // A key bound to one algorithm must not verify tokens of another
        if let Some(key_alg) = key.algorithm()
            && Algorithm::from_str(key_alg).ok() != Some(header.alg)
        {
            return Err(JoseError::Verify(format!(
                "Token algorithm {:?} does not match key algorithm {key_alg}",
                header.alg
            )));
        }

        let jwk: jsonwebtoken::jwk::Jwk =
            serde_json::from_value(Value::Object(members(key).clone()))
                .map_err(|e| JoseError::Key(e.to_string()))?;
        let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| JoseError::Key(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.required_spec_claims.clear();
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;

        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                    JoseError::Malformed(e.to_string())
                }
                _ => JoseError::Verify(e.to_string()),
            })?;

        Ok(data.claims)
    }

    fn decrypt_jwe(&self, token: &str, key: &Jwk) -> Result<String, JoseError> {
        let decrypter = RSA_OAEP
            .decrypter_from_jwk(key)
            .map_err(|e| JoseError::Key(e.to_string()))?;

        let (plaintext, _header) = jwe::deserialize_compact(token, &decrypter)
            .map_err(|e| JoseError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| JoseError::Decrypt("Plaintext is not UTF-8".to_string()))
    }

    fn parse_jwk_set(&self, json: &[u8]) -> Result<Vec<Jwk>, JoseError> {
        let document: Value =
            serde_json::from_slice(json).map_err(|e| JoseError::Malformed(e.to_string()))?;

        let members = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| JoseError::Malformed("JWK set has no 'keys' array".to_string()))?;

        let mut keys = Vec::with_capacity(members.len());
        for (index, member) in members.iter().enumerate() {
            let parsed = match member {
                Value::Object(map) => Jwk::from_map(map.clone()).map_err(|e| e.to_string()),
                _ => Err("not a JSON object".to_string()),
            };
            match parsed {
                Ok(jwk) => keys.push(jwk),
                Err(reason) => warn!(index, %reason, "Skipping invalid JWK set member"),
            }
        }

        Ok(keys)
    }

    fn public_from_private(&self, key: &Jwk) -> Result<Jwk, JoseError> {
        let key_members: &[&str] = match key.key_type() {
            "RSA" => &["n", "e"],
            "EC" => &["crv", "x", "y"],
            "OKP" => &["crv", "x"],
            other => {
                return Err(JoseError::Key(format!(
                    "Key type '{other}' has no public form"
                )));
            }
        };

        let source = members(key);
        let mut public = Map::new();
        for name in COMMON_PUBLIC_MEMBERS.iter().chain(key_members) {
            if let Some(value) = source.get(*name) {
                public.insert((*name).to_string(), value.clone());
            }
        }

        Jwk::from_map(public).map_err(|e| JoseError::Key(e.to_string()))
    }

    fn peek_key_id(&self, token: &str) -> Result<Option<String>, JoseError> {
        jsonwebtoken::decode_header(token)
            .map(|header| header.kid)
            .map_err(|e| JoseError::Malformed(e.to_string()))
    }
}

/// JSON members of a JWK
pub fn members(jwk: &Jwk) -> &Map<String, Value> {
    jwk.as_ref()
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::Jwk;

    /// Fresh 2048-bit RSA key with the given `use`, `alg` and `kid`
    pub(crate) fn rsa_key(key_use: &str, alg: &str, kid: &str) -> Jwk {
        let mut jwk = Jwk::generate_rsa_key(2048).unwrap();
        jwk.set_key_use(key_use);
        jwk.set_algorithm(alg);
        jwk.set_key_id(kid);
        jwk
    }
}
