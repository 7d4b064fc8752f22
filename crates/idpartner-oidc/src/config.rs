//! Client configuration
//!
//! [`ClientConfig`] is what callers supply (programmatically or from a file);
//! [`ClientConfig::resolve`] validates it, merges defaults and derives the
//! response-protection parameters, producing the immutable [`ResolvedConfig`]
//! the client runs on.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;
use url::Url;

use crate::error::{FederationError, Result};
use crate::http::DEFAULT_REQUEST_TIMEOUT;
use crate::jose::{ENCRYPTION_ALG, ENCRYPTION_ENC, Jose, Jwk, SIGNING_ALG, StandardJose, members};

/// Account-selector service used when none is configured
pub const DEFAULT_ACCOUNT_SELECTOR_URL: &str = "https://auth-api.idpartner.com/oidc-proxy";

/// Environment prefix for [`ClientConfig::from_file`] overrides
pub const DEFAULT_ENV_PREFIX: &str = "IDPARTNER";

/// Default request-object lifetime (`exp - iat`)
pub const DEFAULT_REQUEST_OBJECT_LIFETIME_SECS: u64 = 60;

/// Token-endpoint client authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with `client_id:client_secret` (RFC 6749 section 2.3.1)
    #[default]
    ClientSecretBasic,
    /// Mutual-TLS client authentication (RFC 8705)
    TlsClientAuth,
    /// Signed JWT client assertion (OIDC Core section 9)
    PrivateKeyJwt,
}

impl TokenEndpointAuthMethod {
    /// Every supported method, in documentation order
    pub const SUPPORTED: [Self; 3] = [
        Self::ClientSecretBasic,
        Self::TlsClientAuth,
        Self::PrivateKeyJwt,
    ];

    /// Registered metadata value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::TlsClientAuth => "tls_client_auth",
            Self::PrivateKeyJwt => "private_key_jwt",
        }
    }
}

impl std::fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenEndpointAuthMethod {
    type Err = FederationError;

    fn from_str(value: &str) -> Result<Self> {
        Self::SUPPORTED
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| {
                let supported: Vec<_> = Self::SUPPORTED.iter().map(|m| m.as_str()).collect();
                FederationError::config(format!(
                    "Unsupported token_endpoint_auth_method '{value}'. It must be one of ({})",
                    supported.join(", ")
                ))
            })
    }
}

/// Request-object shape
///
/// Deployments differ on whether the signed request object carries `nbf`;
/// both shapes are produced by the same code path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestObjectPolicy {
    /// Add `nbf = iat` to the request object
    #[serde(default)]
    pub include_nbf: bool,
    /// `exp - iat` in seconds
    #[serde(default = "default_request_object_lifetime")]
    pub lifetime_secs: u64,
}

fn default_request_object_lifetime() -> u64 {
    DEFAULT_REQUEST_OBJECT_LIFETIME_SECS
}

impl Default for RequestObjectPolicy {
    fn default() -> Self {
        Self {
            include_nbf: false,
            lifetime_secs: DEFAULT_REQUEST_OBJECT_LIFETIME_SECS,
        }
    }
}

/// Client configuration as supplied by the caller
///
/// # Example
///
/// ```rust
/// use idpartner_oidc::ClientConfig;
///
/// let config = ClientConfig::new("my-client", "https://rp.example.com/callback")
///     .with_client_secret("s3cret");
/// let resolved = config.resolve().unwrap();
/// assert_eq!(resolved.token_endpoint_auth_method().as_str(), "client_secret_basic");
/// ```
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// OAuth client identifier
    pub client_id: String,
    /// Client secret, required for `client_secret_basic`
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Registered redirect URI
    pub redirect_uri: String,
    /// One of `client_secret_basic` (default), `tls_client_auth`, `private_key_jwt`
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// JSON text of the client's private JWK set (one `use=sig` key, optional `use=enc` key)
    #[serde(default)]
    pub jwks: Option<String>,
    /// Base URL of the account-selector service
    #[serde(default)]
    pub account_selector_service_url: Option<String>,
    /// Upstream request timeout in seconds (default 30)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Request-object shape
    #[serde(default)]
    pub request_object: RequestObjectPolicy,
}

// Manual Debug impl so private keys never reach logs
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .field("jwks", &self.jwks.as_ref().map(|_| "<redacted>"))
            .field("account_selector_service_url", &self.account_selector_service_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("request_object", &self.request_object)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration with every optional setting at its default
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            token_endpoint_auth_method: None,
            jwks: None,
            account_selector_service_url: None,
            request_timeout_secs: None,
            request_object: RequestObjectPolicy::default(),
        }
    }

    /// Set the client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Set the token-endpoint authentication method (validated by [`resolve`](Self::resolve))
    pub fn with_token_endpoint_auth_method(mut self, method: impl Into<String>) -> Self {
        self.token_endpoint_auth_method = Some(method.into());
        self
    }

    /// Set the client's private JWK set (JSON text)
    pub fn with_jwks(mut self, jwks: impl Into<String>) -> Self {
        self.jwks = Some(jwks.into());
        self
    }

    /// Override the account-selector service URL
    pub fn with_account_selector_service_url(mut self, url: impl Into<String>) -> Self {
        self.account_selector_service_url = Some(url.into());
        self
    }

    /// Override the upstream request timeout
    ///
    /// The timeout is kept in whole seconds; sub-second remainders round up.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout
            .as_secs()
            .saturating_add(u64::from(timeout.subsec_nanos() > 0));
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Override the request-object shape
    pub fn with_request_object_policy(mut self, policy: RequestObjectPolicy) -> Self {
        self.request_object = policy;
        self
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension. Environment
    /// variables with the `IDPARTNER_` prefix override file settings, e.g.
    /// `IDPARTNER_CLIENT_SECRET=...` or `IDPARTNER_REQUEST_OBJECT__INCLUDE_NBF=true`.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if the file does not exist, has an
    /// unsupported extension, or does not deserialize into a `ClientConfig`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_prefix(path, DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn from_file_with_prefix(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(FederationError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => {
                return Err(FederationError::config(
                    "Unsupported configuration file format. Use .toml, .yaml, .yml, or .json",
                ));
            }
        };

        let file = path.to_str().ok_or_else(|| {
            FederationError::config("Configuration file path is not valid UTF-8")
        })?;

        let config = Config::builder()
            .add_source(File::new(file, format))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate and normalize with the default JOSE backend
    ///
    /// # Errors
    ///
    /// See [`resolve_with`](Self::resolve_with).
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.resolve_with(&StandardJose)
    }

    /// Validate and normalize, parsing keys with `jose`
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if `client_id` or `redirect_uri` is
    /// missing, a URL is malformed, the authentication method is unsupported,
    /// or the key set is unusable (unparseable, no private `use=sig` key).
    pub fn resolve_with(&self, jose: &dyn Jose) -> Result<ResolvedConfig> {
        if self.client_id.trim().is_empty() {
            return Err(FederationError::config("Config missing: client_id is required"));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(FederationError::config("Config missing: redirect_uri is required"));
        }
        Url::parse(&self.redirect_uri)
            .map_err(|e| FederationError::config(format!("Invalid redirect_uri: {e}")))?;

        let token_endpoint_auth_method = match self.token_endpoint_auth_method.as_deref() {
            Some(method) => method.parse()?,
            None => TokenEndpointAuthMethod::default(),
        };

        let client_secret = self
            .client_secret
            .clone()
            .filter(|secret| !secret.expose_secret().is_empty());
        if token_endpoint_auth_method == TokenEndpointAuthMethod::ClientSecretBasic
            && client_secret.is_none()
        {
            warn!(
                client_id = %self.client_id,
                "client_secret_basic configured without a client secret; token calls will fail"
            );
        }

        let account_selector_service_url = self
            .account_selector_service_url
            .as_deref()
            .unwrap_or(DEFAULT_ACCOUNT_SELECTOR_URL)
            .trim_end_matches('/')
            .to_string();
        Url::parse(&account_selector_service_url).map_err(|e| {
            FederationError::config(format!("Invalid account_selector_service_url: {e}"))
        })?;

        if self.request_timeout_secs == Some(0) {
            return Err(FederationError::config(
                "request_timeout_secs must be greater than zero",
            ));
        }

        let keys = self
            .jwks
            .as_deref()
            .map(|jwks| ClientKeys::parse(jwks, jose))
            .transpose()?;

        let response_protection = if keys.is_some() {
            ResponseProtection::signed_and_encrypted()
        } else {
            ResponseProtection::signed()
        };

        Ok(ResolvedConfig {
            client_id: self.client_id.clone(),
            client_secret,
            redirect_uri: self.redirect_uri.clone(),
            token_endpoint_auth_method,
            account_selector_service_url,
            request_timeout: self
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            request_object: self.request_object.clone(),
            keys,
            response_protection,
        })
    }
}

/// The client's own private keys
#[derive(Clone)]
pub struct ClientKeys {
    keys: Vec<Jwk>,
    signing: Jwk,
    encryption: Option<Jwk>,
}

impl std::fmt::Debug for ClientKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeys")
            .field("signing_kid", &self.signing.key_id())
            .field("encryption_kid", &self.encryption.as_ref().and_then(|k| k.key_id()))
            .field("key_count", &self.keys.len())
            .finish()
    }
}

impl ClientKeys {
    fn parse(jwks: &str, jose: &dyn Jose) -> Result<Self> {
        let keys = jose
            .parse_jwk_set(jwks.as_bytes())
            .map_err(|e| FederationError::config(format!("Invalid jwks: {e}")))?;

        let signing = select_by_use(&keys, "sig").ok_or_else(|| {
            FederationError::config("jwks must contain a signing key (use=sig)")
        })?;
        ensure_private(signing, "sig")?;

        let encryption = select_by_use(&keys, "enc");
        if let Some(key) = encryption {
            ensure_private(key, "enc")?;
        }

        Ok(Self {
            signing: signing.clone(),
            encryption: encryption.cloned(),
            keys,
        })
    }

    /// Every key in declared order
    pub fn all(&self) -> &[Jwk] {
        &self.keys
    }

    /// Request-object / client-assertion signing key
    pub fn signing(&self) -> &Jwk {
        &self.signing
    }

    /// Response decryption key
    pub fn encryption(&self) -> Option<&Jwk> {
        self.encryption.as_ref()
    }

    /// Public half of every key, as a JWK set document
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if a key has no public form.
    pub fn public_jwks(&self, jose: &dyn Jose) -> Result<Value> {
        let keys = self
            .keys
            .iter()
            .map(|key| {
                jose.public_from_private(key)
                    .map(|public| Value::Object(members(&public).clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(json!({ "keys": keys }))
    }
}

/// First key with the given `use`; later duplicates are ignored with a warning
fn select_by_use<'a>(keys: &'a [Jwk], key_use: &str) -> Option<&'a Jwk> {
    let mut matching = keys.iter().filter(|key| key.key_use() == Some(key_use));
    let selected = matching.next();
    let ignored = matching.count();
    if ignored > 0 {
        warn!(
            key_use,
            ignored,
            kid = ?selected.and_then(|k| k.key_id()),
            "Multiple keys share the same use; the first one declared is used"
        );
    }
    selected
}

fn ensure_private(key: &Jwk, key_use: &str) -> Result<()> {
    if members(key).contains_key("d") {
        Ok(())
    } else {
        Err(FederationError::config(format!(
            "The use={key_use} key in jwks must be a private key"
        )))
    }
}

/// Response-protection parameters registered for this client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseProtection {
    pub authorization_signed_response_alg: &'static str,
    pub id_token_signed_response_alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_encrypted_response_alg: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_encrypted_response_enc: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_alg: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_encrypted_response_enc: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_object_signing_alg: Option<&'static str>,
}

impl ResponseProtection {
    fn signed() -> Self {
        Self {
            authorization_signed_response_alg: SIGNING_ALG,
            id_token_signed_response_alg: SIGNING_ALG,
            authorization_encrypted_response_alg: None,
            authorization_encrypted_response_enc: None,
            id_token_encrypted_response_alg: None,
            id_token_encrypted_response_enc: None,
            request_object_signing_alg: None,
        }
    }

    fn signed_and_encrypted() -> Self {
        Self {
            authorization_encrypted_response_alg: Some(ENCRYPTION_ALG),
            authorization_encrypted_response_enc: Some(ENCRYPTION_ENC),
            id_token_encrypted_response_alg: Some(ENCRYPTION_ALG),
            id_token_encrypted_response_enc: Some(ENCRYPTION_ENC),
            request_object_signing_alg: Some(SIGNING_ALG),
            ..Self::signed()
        }
    }
}

/// Validated, immutable client configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    client_id: String,
    client_secret: Option<SecretString>,
    redirect_uri: String,
    token_endpoint_auth_method: TokenEndpointAuthMethod,
    account_selector_service_url: String,
    request_timeout: Duration,
    request_object: RequestObjectPolicy,
    keys: Option<ClientKeys>,
    response_protection: ResponseProtection,
}

impl ResolvedConfig {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn token_endpoint_auth_method(&self) -> TokenEndpointAuthMethod {
        self.token_endpoint_auth_method
    }

    pub fn account_selector_service_url(&self) -> &str {
        &self.account_selector_service_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn request_object(&self) -> &RequestObjectPolicy {
        &self.request_object
    }

    /// The client's key set, when one is configured
    pub fn keys(&self) -> Option<&ClientKeys> {
        self.keys.as_ref()
    }

    pub fn response_protection(&self) -> &ResponseProtection {
        &self.response_protection
    }

    /// Public JWK set; empty when no key set is configured
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if a configured key has no public form.
    pub fn public_jwks(&self, jose: &dyn Jose) -> Result<Value> {
        match &self.keys {
            Some(keys) => keys.public_jwks(jose),
            None => Ok(json!({ "keys": [] })),
        }
    }

    /// Registration metadata a provider needs for this client
    ///
    /// # Errors
    ///
    /// Same as [`public_jwks`](Self::public_jwks).
    pub fn client_metadata(&self, jose: &dyn Jose) -> Result<Value> {
        let mut metadata = json!({
            "client_id": self.client_id,
            "redirect_uris": [self.redirect_uri],
            "token_endpoint_auth_method": self.token_endpoint_auth_method.as_str(),
        });
        if let (Value::Object(target), Value::Object(protection)) = (
            &mut metadata,
            serde_json::to_value(&self.response_protection)
                .map_err(|e| FederationError::config(e.to_string()))?,
        ) {
            target.extend(protection);
            if self.keys.is_some() {
                target.insert("jwks".to_string(), self.public_jwks(jose)?);
            }
        }
        Ok(metadata)
    }
}
