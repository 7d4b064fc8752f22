//! Error types for the federation client
//!
//! Every failure surfaced by [`FederationClient`](crate::FederationClient) is a
//! [`FederationError`]. Upstream failures (transport errors and non-2xx
//! responses alike) carry the endpoint they came from and the upstream body
//! verbatim, so a failed attempt can be diagnosed from the error alone.

use thiserror::Error;

use crate::jose::JoseError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FederationError>;

/// Federation client errors
#[derive(Debug, Error)]
pub enum FederationError {
    /// Invalid construction input or missing credential
    #[error("Invalid client configuration: {0}")]
    Config(String),

    /// Missing or malformed call argument (caller bug, raised before any I/O)
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Issuer metadata could not be fetched or parsed
    #[error("Failed to fetch well-known config for {issuer}: {reason}")]
    Discovery { issuer: String, reason: String },

    /// Pushed authorization request was rejected or failed
    #[error("Failed to push authorization request to {endpoint}: {reason}")]
    PushedAuthorization { endpoint: String, reason: String },

    /// Authorization code could not be exchanged
    #[error("Failed to exchange token at {endpoint}: {reason}")]
    TokenExchange { endpoint: String, reason: String },

    /// Userinfo endpoint call failed
    #[error("Failed to retrieve userinfo from {endpoint}: {reason}")]
    UserInfo { endpoint: String, reason: String },

    /// Provider JWK set could not be fetched or parsed
    #[error("Failed to fetch provider keys from {jwks_uri}: {reason}")]
    ProviderKeys { jwks_uri: String, reason: String },

    /// No provider key matches the response's `kid`
    #[error("No provider key found for kid: {0}")]
    UnknownKey(String),

    /// Response signature did not verify or the token is malformed
    #[error("Response signature verification failed: {0}")]
    SignatureVerification(String),

    /// Encrypted response could not be decrypted
    #[error("Response decryption failed: {0}")]
    Decryption(String),

    /// Provider reported an authorization error instead of a code
    #[error("Authorization denied: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// Response `state` does not belong to this authorization attempt
    #[error("State in authorization response does not match the attempt's state")]
    StateMismatch,

    /// Verified response lacks a required member
    #[error("Invalid authorization response: {0}")]
    InvalidResponse(String),
}

impl FederationError {
    /// Whether the error is a cryptographic or protocol integrity failure
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownKey(_)
                | Self::SignatureVerification(_)
                | Self::Decryption(_)
                | Self::StateMismatch
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }
}

impl From<config::ConfigError> for FederationError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(format!("Failed to load configuration: {e}"))
    }
}

impl From<JoseError> for FederationError {
    fn from(e: JoseError) -> Self {
        match e {
            JoseError::Decrypt(msg) => Self::Decryption(msg),
            JoseError::Verify(msg) | JoseError::Malformed(msg) => Self::SignatureVerification(msg),
            JoseError::Key(msg) | JoseError::Sign(msg) => Self::Config(msg),
        }
    }
}

/// Format an upstream non-success response the way every error variant embeds it
pub(crate) fn upstream_failure(status: http::StatusCode, body: &[u8]) -> String {
    format!("HTTP {}: {}", status.as_u16(), String::from_utf8_lossy(body))
}
