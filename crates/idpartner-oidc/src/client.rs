//! The federation client

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::authorization::{
    self, AuthorizationQuery, AuthorizationRequest, authorization_params, par_payload,
    provider_redirect_url, selector_url,
};
use crate::callback::{self, CallbackQuery, TokenResponse, UserInfo};
use crate::config::{ClientConfig, ResolvedConfig};
use crate::discovery::{DiscoveryClient, IssuerEndpoints};
use crate::error::{FederationError, Result};
use crate::http::{HttpTransport, ReqwestTransport};
use crate::jose::{Jose, StandardJose};
use crate::keys::ProviderKeyCache;
use crate::proofs::Proofs;

/// OIDC relying-party client for the account-selector federation flow
///
/// Cheap to clone; clones share the issuer and provider key caches.
///
/// # Example
///
/// ```rust,no_run
/// use idpartner_oidc::{AuthorizationQuery, AuthorizationRequest, ClientConfig, FederationClient};
///
/// # async fn example() -> idpartner_oidc::Result<()> {
/// let client = FederationClient::new(
///     ClientConfig::new("my-client", "https://rp.example.com/callback")
///         .with_client_secret("s3cret"),
/// )?;
///
/// let proofs = client.generate_proofs();
/// let request = AuthorizationRequest::new(["openid", "email", "profile"]).with_prompt("consent");
/// let url = client
///     .authorization_url(&AuthorizationQuery::default(), &proofs, &request)
///     .await?;
/// println!("redirect to {url}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FederationClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ResolvedConfig,
    transport: Arc<dyn HttpTransport>,
    jose: Arc<dyn Jose>,
    discovery: DiscoveryClient,
    provider_keys: ProviderKeyCache,
}

impl FederationClient {
    /// Create a client with the default `reqwest` transport and JOSE backend
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if the configuration is invalid or
    /// the HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let jose = Arc::new(StandardJose);
        let resolved = config.resolve_with(jose.as_ref())?;
        let transport = ReqwestTransport::with_timeout(resolved.request_timeout())
            .map_err(|e| FederationError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::from_parts(resolved, Arc::new(transport), jose))
    }

    /// Create a client with injected transport and JOSE capabilities
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if the configuration is invalid.
    pub fn with_components(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        jose: Arc<dyn Jose>,
    ) -> Result<Self> {
        let resolved = config.resolve_with(jose.as_ref())?;
        Ok(Self::from_parts(resolved, transport, jose))
    }

    fn from_parts(config: ResolvedConfig, transport: Arc<dyn HttpTransport>, jose: Arc<dyn Jose>) -> Self {
        info!(
            client_id = config.client_id(),
            token_endpoint_auth_method = %config.token_endpoint_auth_method(),
            signed_requests = config.keys().is_some(),
            "Federation client created"
        );
        Self {
            inner: Arc::new(Inner {
                discovery: DiscoveryClient::new(Arc::clone(&transport)),
                provider_keys: ProviderKeyCache::new(Arc::clone(&transport), Arc::clone(&jose)),
                config,
                transport,
                jose,
            }),
        }
    }

    /// The validated configuration
    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// Fresh proofs for a new authorization attempt
    pub fn generate_proofs(&self) -> Proofs {
        Proofs::generate()
    }

    /// Endpoints for `issuer`, discovered on first use
    ///
    /// # Errors
    ///
    /// See [`DiscoveryClient::discover`].
    pub async fn discover(&self, issuer: &str) -> Result<Arc<IssuerEndpoints>> {
        self.inner.discovery.discover(issuer).await
    }

    /// URL to redirect the user agent to
    ///
    /// Without `query.iss` this is the account-selector URL and no request is
    /// made. With it, the issuer is discovered, the authorization request is
    /// pushed and the provider's authorization URL is returned.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Argument`] for an empty scope or incomplete
    /// proofs (before any I/O), [`FederationError::Discovery`] or
    /// [`FederationError::PushedAuthorization`] when the provider calls fail.
    pub async fn authorization_url(
        &self,
        query: &AuthorizationQuery,
        proofs: &Proofs,
        request: &AuthorizationRequest,
    ) -> Result<Url> {
        let inner = &self.inner;
        let Some(issuer) = query.iss.as_deref().filter(|iss| !iss.is_empty()) else {
            return selector_url(&inner.config, query, request);
        };

        let params = authorization_params(&inner.config, query, proofs, request)?;
        let endpoints = inner.discovery.discover(issuer).await?;
        let payload = par_payload(&inner.config, inner.jose.as_ref(), issuer, params)?;
        let pushed = authorization::push_authorization_request(
            &inner.config,
            inner.jose.as_ref(),
            inner.transport.as_ref(),
            &endpoints,
            payload,
        )
        .await?;

        debug!(issuer, "Built provider authorization URL");
        Ok(provider_redirect_url(&endpoints, &pushed.request_uri))
    }

    /// Verify the callback response and exchange its code for tokens
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::AuthorizationDenied`] when the provider
    /// reported an error, one of the integrity errors
    /// ([`FederationError::is_integrity_failure`]) when the response does not
    /// verify, and [`FederationError::TokenExchange`] when the token call fails.
    pub async fn exchange_code(&self, query: &CallbackQuery, proofs: &Proofs) -> Result<TokenResponse> {
        let inner = &self.inner;
        let response = query.response()?;
        proofs.ensure_complete()?;

        let endpoints = self.issuer_for(query.iss.as_deref()).await?;
        let token = callback::decode_response(&inner.config, inner.jose.as_ref(), response)?;
        let payload = callback::verify_response(
            inner.jose.as_ref(),
            &inner.provider_keys,
            &endpoints,
            &token,
        )
        .await?;
        let code = callback::authorization_code(&payload, proofs)?;

        callback::exchange_code(
            &inner.config,
            inner.jose.as_ref(),
            inner.transport.as_ref(),
            &endpoints,
            &code,
            proofs,
        )
        .await
    }

    /// Userinfo claims for `access_token` from the current issuer
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Argument`] if no issuer has been discovered
    /// or the token is empty, [`FederationError::UserInfo`] when the call fails.
    pub async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo> {
        let endpoints = self.issuer_for(None).await?;
        callback::fetch_userinfo(self.inner.transport.as_ref(), &endpoints, access_token).await
    }

    /// Public half of the configured key set; `{"keys": []}` without one
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Config`] if a configured key has no public form.
    pub fn public_jwks(&self) -> Result<Value> {
        self.inner.config.public_jwks(self.inner.jose.as_ref())
    }

    /// Registration metadata for this client
    ///
    /// # Errors
    ///
    /// Same as [`public_jwks`](Self::public_jwks).
    pub fn client_metadata(&self) -> Result<Value> {
        self.inner.config.client_metadata(self.inner.jose.as_ref())
    }

    async fn issuer_for(&self, issuer: Option<&str>) -> Result<Arc<IssuerEndpoints>> {
        match issuer.filter(|iss| !iss.is_empty()) {
            Some(issuer) => self.inner.discovery.discover(issuer).await,
            None => self.inner.discovery.current().await.ok_or_else(|| {
                FederationError::argument("No issuer has been discovered for this client")
            }),
        }
    }
}
