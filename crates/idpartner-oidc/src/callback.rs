//! Callback handling: response verification, code exchange and userinfo
//!
//! The provider returns a JARM response (`response_mode=jwt`): a compact JWS,
//! or a JWE wrapping one when the client registered an encryption key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info};

use crate::client_auth::credentials_for;
use crate::config::ResolvedConfig;
use crate::discovery::IssuerEndpoints;
use crate::error::{FederationError, Result, upstream_failure};
use crate::http::{self, HttpTransport, bearer_authorization};
use crate::jose::Jose;
use crate::keys::ProviderKeyCache;
use crate::proofs::Proofs;

/// Compact JWE serialization has five segments, JWS three
const JWE_SEGMENTS: usize = 5;

/// Query parameters the provider redirects back with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    /// JARM response token
    #[serde(default)]
    pub response: Option<String>,
    /// Issuer that produced the response
    #[serde(default)]
    pub iss: Option<String>,
    /// Plain OAuth error, when the provider did not issue a JARM response
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackQuery {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }

    /// The response token, or the provider's error
    pub(crate) fn response(&self) -> Result<&str> {
        if let Some(error) = &self.error {
            return Err(FederationError::AuthorizationDenied {
                error: error.clone(),
                description: self.error_description.clone(),
            });
        }
        self.response
            .as_deref()
            .filter(|response| !response.is_empty())
            .ok_or_else(|| FederationError::argument("The callback 'response' parameter is required"))
    }
}

/// Token endpoint response, verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenResponse(Map<String, Value>);

impl TokenResponse {
    pub fn access_token(&self) -> Option<&str> {
        self.0.get("access_token").and_then(Value::as_str)
    }

    pub fn id_token(&self) -> Option<&str> {
        self.0.get("id_token").and_then(Value::as_str)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.0.get("refresh_token").and_then(Value::as_str)
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.0.get("expires_in").and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Userinfo claims, verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserInfo(Map<String, Value>);

impl UserInfo {
    pub fn subject(&self) -> Option<&str> {
        self.claim("sub").and_then(Value::as_str)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Unwrap an encrypted response to its inner JWS; a JWS passes through
///
/// # Errors
///
/// Returns [`FederationError::Decryption`] if the response is encrypted and
/// no encryption key is configured or decryption fails.
pub(crate) fn decode_response(config: &ResolvedConfig, jose: &dyn Jose, response: &str) -> Result<String> {
    if response.split('.').count() != JWE_SEGMENTS {
        return Ok(response.to_string());
    }

    let key = config
        .keys()
        .and_then(|keys| keys.encryption())
        .ok_or_else(|| {
            FederationError::Decryption(
                "Response is encrypted but no use=enc key is configured".to_string(),
            )
        })?;

    debug!(kid = ?key.key_id(), "Decrypting authorization response");
    Ok(jose.decrypt_jwe(response, key)?)
}

/// Verify a response JWS against the issuer's published keys
///
/// # Errors
///
/// Returns [`FederationError::UnknownKey`] if no provider key matches the
/// header `kid`, [`FederationError::SignatureVerification`] if the signature
/// does not verify or the token is malformed, and
/// [`FederationError::InvalidResponse`] if the payload names another issuer.
pub(crate) async fn verify_response(
    jose: &dyn Jose,
    keys: &ProviderKeyCache,
    endpoints: &IssuerEndpoints,
    token: &str,
) -> Result<Map<String, Value>> {
    let kid = jose
        .peek_key_id(token)?
        .ok_or_else(|| FederationError::UnknownKey("<missing kid>".to_string()))?;

    let key = keys.resolve(&endpoints.jwks_uri, &kid).await?;
    let claims = jose.verify_jws(token, &key)?;
    ensure_issuer(&claims, &endpoints.issuer)?;

    debug!(issuer = %endpoints.issuer, kid = %kid, "Verified authorization response");
    Ok(claims)
}

/// The response must be issued by the issuer whose endpoints receive the code
fn ensure_issuer(payload: &Map<String, Value>, issuer: &str) -> Result<()> {
    let declared = payload
        .get("iss")
        .and_then(Value::as_str)
        .ok_or_else(|| FederationError::InvalidResponse("response has no 'iss'".to_string()))?;

    if declared.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(FederationError::InvalidResponse(format!(
            "response issued by '{declared}', expected '{issuer}'"
        )));
    }
    Ok(())
}

/// Authorization code from a verified response payload
///
/// # Errors
///
/// Returns [`FederationError::AuthorizationDenied`] for an `error` payload,
/// [`FederationError::StateMismatch`] when `state` differs from the attempt's,
/// and [`FederationError::InvalidResponse`] when `code` is missing.
pub(crate) fn authorization_code(payload: &Map<String, Value>, proofs: &Proofs) -> Result<String> {
    if let Some(error) = payload.get("error").and_then(Value::as_str) {
        return Err(FederationError::AuthorizationDenied {
            error: error.to_string(),
            description: payload
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    if let Some(state) = payload.get("state")
        && !state
            .as_str()
            .is_some_and(|state| bool::from(state.as_bytes().ct_eq(proofs.state.as_bytes())))
    {
        return Err(FederationError::StateMismatch);
    }

    payload
        .get("code")
        .and_then(Value::as_str)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FederationError::InvalidResponse("response has no 'code'".to_string()))
}

/// Exchange `code` at the token endpoint
///
/// # Errors
///
/// Returns [`FederationError::TokenExchange`] on transport failure or a
/// non-success status (body embedded), and [`FederationError::Config`] when
/// client credentials are missing.
pub(crate) async fn exchange_code(
    config: &ResolvedConfig,
    jose: &dyn Jose,
    transport: &dyn HttpTransport,
    endpoints: &IssuerEndpoints,
    code: &str,
    proofs: &Proofs,
) -> Result<TokenResponse> {
    let endpoint = &endpoints.token_endpoint;
    let failure = |reason: String| FederationError::TokenExchange {
        endpoint: endpoint.to_string(),
        reason,
    };

    let credentials = credentials_for(config, jose, endpoint)?;
    let mut params = vec![
        ("code".to_string(), code.to_string()),
        ("code_verifier".to_string(), proofs.code_verifier.clone()),
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("redirect_uri".to_string(), config.redirect_uri().to_string()),
    ];
    params.extend(credentials.params);

    let request = http::post_form(endpoint.as_str(), credentials.authorization.as_deref(), &params)
        .map_err(|e| failure(e.to_string()))?;
    let response = transport.send(request).await.map_err(|e| {
        error!(endpoint = %endpoint, error = %e, "Token request failed");
        failure(e.to_string())
    })?;

    if !response.status().is_success() {
        error!(
            endpoint = %endpoint,
            status = response.status().as_u16(),
            "Token endpoint rejected the code"
        );
        return Err(failure(upstream_failure(response.status(), response.body())));
    }

    let tokens: TokenResponse = serde_json::from_slice(response.body())
        .map_err(|e| failure(format!("invalid token response: {e}")))?;

    info!(endpoint = %endpoint, "Exchanged authorization code");
    Ok(tokens)
}

/// Fetch the userinfo claims for `access_token`
///
/// # Errors
///
/// Returns [`FederationError::Argument`] for an empty token and
/// [`FederationError::UserInfo`] on transport failure or a non-success status.
pub(crate) async fn fetch_userinfo(
    transport: &dyn HttpTransport,
    endpoints: &IssuerEndpoints,
    access_token: &str,
) -> Result<UserInfo> {
    if access_token.is_empty() {
        return Err(FederationError::argument("The access token is required"));
    }

    let endpoint = &endpoints.userinfo_endpoint;
    let failure = |reason: String| FederationError::UserInfo {
        endpoint: endpoint.to_string(),
        reason,
    };

    let request = http::get_json(endpoint.as_str(), Some(&bearer_authorization(access_token)))
        .map_err(|e| failure(e.to_string()))?;
    let response = transport.send(request).await.map_err(|e| {
        error!(endpoint = %endpoint, error = %e, "Userinfo request failed");
        failure(e.to_string())
    })?;

    if !response.status().is_success() {
        error!(
            endpoint = %endpoint,
            status = response.status().as_u16(),
            "Userinfo endpoint returned error status"
        );
        return Err(failure(upstream_failure(response.status(), response.body())));
    }

    serde_json::from_slice(response.body()).map_err(|e| failure(format!("invalid userinfo: {e}")))
}
