//! Authorization URL construction
//!
//! Without an issuer the user is sent to the account selector. With one, the
//! authorization parameters are pushed to the issuer's PAR endpoint (RFC 9126),
//! optionally wrapped in a signed request object, and the user is sent to the
//! authorization endpoint with the returned `request_uri`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

use crate::client_auth::credentials_for;
use crate::config::ResolvedConfig;
use crate::discovery::IssuerEndpoints;
use crate::error::{FederationError, Result, upstream_failure};
use crate::http::{self, HttpTransport};
use crate::jose::{Jose, SigningAlgorithm};
use crate::proofs::{CODE_CHALLENGE_METHOD, Proofs};

/// Path of the account-selection page under the selector service
pub const SELECT_ACCOUNTS_PATH: &str = "/auth/select-accounts";

/// Parameters the client sets itself; caller extras may not replace them
const RESERVED_PARAMS: &[&str] = &[
    "redirect_uri",
    "code_challenge_method",
    "code_challenge",
    "state",
    "nonce",
    "scope",
    "prompt",
    "response_type",
    "client_id",
    "x-fapi-interaction-id",
    "identity_provider_id",
    "idpartner_token",
    "claims",
    "response_mode",
    "request",
    "request_uri",
    "iss",
    "aud",
    "iat",
    "exp",
    "nbf",
    "client_assertion",
    "client_assertion_type",
];

/// Query parameters of the request that starts an authorization attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationQuery {
    /// Issuer chosen in the account selector; absent on the first visit
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub visitor_id: Option<String>,
    /// Identity provider chosen in the account selector
    #[serde(default)]
    pub idp_id: Option<String>,
    #[serde(default)]
    pub idpartner_token: Option<String>,
}

/// OIDC claims request (OIDC Core section 5.5)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsRequest {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub userinfo: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub id_token: Map<String, Value>,
}

impl ClaimsRequest {
    pub fn is_empty(&self) -> bool {
        self.userinfo.is_empty() && self.id_token.is_empty()
    }

    /// Requested claim names, `userinfo` first, without duplicates
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.userinfo.keys().chain(self.id_token.keys()) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }
}

/// What the caller asks for in one authorization attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationRequest {
    /// Ordered scope values
    pub scope: Vec<String>,
    /// e.g. `consent`
    pub prompt: Option<String>,
    pub claims: Option<ClaimsRequest>,
    /// Additional authorization parameters
    pub extra_params: Vec<(String, String)>,
}

impl AuthorizationRequest {
    pub fn new<I, S>(scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: scope.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_claims(mut self, claims: ClaimsRequest) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn with_extra_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((name.into(), value.into()));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.scope.is_empty() || self.scope.iter().any(|s| s.trim().is_empty()) {
            return Err(FederationError::argument("The scope parameters are required"));
        }
        if let Some((name, _)) = self
            .extra_params
            .iter()
            .find(|(name, _)| RESERVED_PARAMS.contains(&name.as_str()))
        {
            return Err(FederationError::argument(format!(
                "The authorization parameter '{name}' is reserved"
            )));
        }
        Ok(())
    }

    fn claim_names(&self) -> Vec<&str> {
        self.claims.as_ref().map(ClaimsRequest::names).unwrap_or_default()
    }
}

/// Successful PAR response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushedAuthorizationResponse {
    pub request_uri: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Account-selector URL for an attempt with no issuer yet
///
/// # Errors
///
/// Returns [`FederationError::Argument`] if the scope is empty or
/// [`FederationError::Config`] if the selector URL is malformed.
pub fn selector_url(
    config: &ResolvedConfig,
    query: &AuthorizationQuery,
    request: &AuthorizationRequest,
) -> Result<Url> {
    request.validate()?;

    let mut url = Url::parse(&format!(
        "{}{SELECT_ACCOUNTS_PATH}",
        config.account_selector_service_url()
    ))
    .map_err(|e| FederationError::config(format!("Invalid account selector URL: {e}")))?;

    // Form encoding turns the space separators into `+`
    url.query_pairs_mut()
        .append_pair("client_id", config.client_id())
        .append_pair("visitor_id", query.visitor_id.as_deref().unwrap_or_default())
        .append_pair("scope", &request.scope.join(" "))
        .append_pair("claims", &request.claim_names().join(" "));

    debug!(client_id = config.client_id(), "Built account selector URL");
    Ok(url)
}

/// The authorization parameter set, absent values dropped
///
/// # Errors
///
/// Returns [`FederationError::Argument`] for an empty scope, incomplete
/// proofs or a reserved extra parameter.
pub fn authorization_params(
    config: &ResolvedConfig,
    query: &AuthorizationQuery,
    proofs: &Proofs,
    request: &AuthorizationRequest,
) -> Result<Vec<(String, String)>> {
    request.validate()?;
    proofs.ensure_complete()?;

    let claims = match &request.claims {
        Some(claims) if !claims.is_empty() => Some(
            serde_json::to_string(claims)
                .map_err(|e| FederationError::argument(format!("Invalid claims request: {e}")))?,
        ),
        _ => None,
    };

    let params = [
        ("redirect_uri", Some(config.redirect_uri().to_string())),
        ("code_challenge_method", Some(CODE_CHALLENGE_METHOD.to_string())),
        ("code_challenge", Some(proofs.code_challenge())),
        ("state", Some(proofs.state.clone())),
        ("nonce", Some(proofs.nonce.clone())),
        ("scope", Some(request.scope.join(" "))),
        ("prompt", request.prompt.clone()),
        ("response_type", Some("code".to_string())),
        ("client_id", Some(config.client_id().to_string())),
        ("x-fapi-interaction-id", Some(Uuid::new_v4().to_string())),
        ("identity_provider_id", query.idp_id.clone()),
        ("idpartner_token", query.idpartner_token.clone()),
        ("claims", claims),
        ("response_mode", Some("jwt".to_string())),
    ];

    Ok(params
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
        .chain(request.extra_params.iter().cloned())
        .collect())
}

/// Request-object claims: the parameter set plus `iss`, `aud`, `iat`, `exp`
/// and, when the policy asks for it, `nbf`
pub fn request_object_claims(
    config: &ResolvedConfig,
    issuer: &str,
    params: &[(String, String)],
    issued_at: i64,
) -> Map<String, Value> {
    let policy = config.request_object();
    let lifetime = i64::try_from(policy.lifetime_secs).unwrap_or(i64::MAX);

    let mut claims: Map<String, Value> = params
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    claims.insert("iss".to_string(), json!(config.client_id()));
    claims.insert("aud".to_string(), json!(issuer));
    claims.insert("iat".to_string(), json!(issued_at));
    claims.insert("exp".to_string(), json!(issued_at.saturating_add(lifetime)));
    if policy.include_nbf {
        claims.insert("nbf".to_string(), json!(issued_at));
    }
    claims
}

/// PAR form payload: a signed request object when a key set is configured,
/// the raw parameter set otherwise
///
/// # Errors
///
/// Returns [`FederationError::Config`] if the request object cannot be signed.
pub(crate) fn par_payload(
    config: &ResolvedConfig,
    jose: &dyn Jose,
    issuer: &str,
    params: Vec<(String, String)>,
) -> Result<Vec<(String, String)>> {
    let Some(keys) = config.keys() else {
        return Ok(params);
    };

    let claims = request_object_claims(config, issuer, &params, Utc::now().timestamp());
    let request = jose.sign_jwt(&claims, keys.signing(), SigningAlgorithm::Ps256)?;
    debug!(issuer, kid = ?keys.signing().key_id(), "Signed request object");
    Ok(vec![("request".to_string(), request)])
}

/// Push `payload` to the issuer's PAR endpoint
///
/// # Errors
///
/// Returns [`FederationError::PushedAuthorization`] on transport failure, a
/// non-success status (body embedded) or a response without `request_uri`.
pub(crate) async fn push_authorization_request(
    config: &ResolvedConfig,
    jose: &dyn Jose,
    transport: &dyn HttpTransport,
    endpoints: &IssuerEndpoints,
    mut payload: Vec<(String, String)>,
) -> Result<PushedAuthorizationResponse> {
    let endpoint = &endpoints.pushed_authorization_request_endpoint;
    let failure = |reason: String| FederationError::PushedAuthorization {
        endpoint: endpoint.to_string(),
        reason,
    };

    let credentials = credentials_for(config, jose, endpoint)?;
    for (name, value) in credentials.params {
        if !payload.iter().any(|(existing, _)| *existing == name) {
            payload.push((name, value));
        }
    }

    let request = http::post_form(endpoint.as_str(), credentials.authorization.as_deref(), &payload)
        .map_err(|e| failure(e.to_string()))?;
    let response = transport.send(request).await.map_err(|e| {
        error!(endpoint = %endpoint, error = %e, "Pushed authorization request failed");
        failure(e.to_string())
    })?;

    if !response.status().is_success() {
        error!(
            endpoint = %endpoint,
            status = response.status().as_u16(),
            "Pushed authorization request rejected"
        );
        return Err(failure(upstream_failure(response.status(), response.body())));
    }

    let pushed: PushedAuthorizationResponse = serde_json::from_slice(response.body())
        .map_err(|e| failure(format!("invalid PAR response: {e}")))?;

    info!(
        endpoint = %endpoint,
        expires_in = ?pushed.expires_in,
        "Pushed authorization request accepted"
    );
    Ok(pushed)
}

/// `{authorization_endpoint}?request_uri=<request_uri>`
pub fn provider_redirect_url(endpoints: &IssuerEndpoints, request_uri: &str) -> Url {
    let mut url = endpoints.authorization_endpoint.clone();
    url.query_pairs_mut().append_pair("request_uri", request_uri);
    url
}
