//! Issuer discovery (OpenID Connect Discovery 1.0)
//!
//! The client follows one issuer at a time: discovering the same issuer again
//! is served from cache, a different issuer replaces the cached entry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{FederationError, Result, upstream_failure};
use crate::http::{self, HttpTransport};

/// Path appended to the issuer to locate its metadata document
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Endpoints of one discovered issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerEndpoints {
    /// Issuer identifier the endpoints were discovered for
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Url,
    pub pushed_authorization_request_endpoint: Url,
    pub jwks_uri: Url,
}

/// Raw metadata document; only the members this client uses
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: Option<String>,
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    pushed_authorization_request_endpoint: Option<String>,
    jwks_uri: Option<String>,
}

impl IssuerEndpoints {
    fn from_metadata(issuer: &str, metadata: ProviderMetadata) -> std::result::Result<Self, String> {
        if let Some(declared) = metadata.issuer.as_deref()
            && declared.trim_end_matches('/') != issuer.trim_end_matches('/')
        {
            warn!(issuer, declared, "Discovered metadata declares a different issuer");
        }

        let endpoint = |name: &str, value: Option<String>| -> std::result::Result<Url, String> {
            let value = value.ok_or_else(|| format!("metadata is missing '{name}'"))?;
            Url::parse(&value).map_err(|e| format!("'{name}' is not a valid URL ({value}): {e}"))
        };

        Ok(Self {
            issuer: issuer.to_string(),
            authorization_endpoint: endpoint(
                "authorization_endpoint",
                metadata.authorization_endpoint,
            )?,
            token_endpoint: endpoint("token_endpoint", metadata.token_endpoint)?,
            userinfo_endpoint: endpoint("userinfo_endpoint", metadata.userinfo_endpoint)?,
            pushed_authorization_request_endpoint: endpoint(
                "pushed_authorization_request_endpoint",
                metadata.pushed_authorization_request_endpoint,
            )?,
            jwks_uri: endpoint("jwks_uri", metadata.jwks_uri)?,
        })
    }
}

/// Metadata document URL for `issuer`
pub fn well_known_url(issuer: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", issuer.trim_end_matches('/'))
}

/// Fetches issuer metadata and caches the most recent issuer
#[derive(Debug)]
pub struct DiscoveryClient {
    transport: Arc<dyn HttpTransport>,
    current: RwLock<Option<Arc<IssuerEndpoints>>>,
}

impl DiscoveryClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            current: RwLock::new(None),
        }
    }

    /// Endpoints for `issuer`, fetched on first use
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::Argument`] for an empty issuer and
    /// [`FederationError::Discovery`] when the document cannot be fetched or
    /// lacks one of the required endpoints.
    pub async fn discover(&self, issuer: &str) -> Result<Arc<IssuerEndpoints>> {
        if issuer.trim().is_empty() {
            return Err(FederationError::argument("The issuer must not be empty"));
        }

        {
            let current = self.current.read().await;
            if let Some(endpoints) = current.as_ref()
                && endpoints.issuer == issuer
            {
                debug!(issuer, "Using cached issuer metadata");
                return Ok(Arc::clone(endpoints));
            }
        }

        let endpoints = Arc::new(self.fetch(issuer).await?);

        let mut current = self.current.write().await;
        if let Some(previous) = current.as_ref() {
            debug!(
                previous = %previous.issuer,
                issuer,
                "Replacing cached issuer metadata"
            );
        }
        *current = Some(Arc::clone(&endpoints));
        Ok(endpoints)
    }

    /// Endpoints of the most recently discovered issuer
    pub async fn current(&self) -> Option<Arc<IssuerEndpoints>> {
        self.current.read().await.clone()
    }

    async fn fetch(&self, issuer: &str) -> Result<IssuerEndpoints> {
        let url = well_known_url(issuer);
        let failure = |reason: String| FederationError::Discovery {
            issuer: issuer.to_string(),
            reason,
        };

        let request = http::get_json(&url, None).map_err(|e| failure(e.to_string()))?;
        let response = self.transport.send(request).await.map_err(|e| {
            error!(issuer, error = %e, "Failed to fetch issuer metadata");
            failure(e.to_string())
        })?;

        if !response.status().is_success() {
            error!(issuer, status = response.status().as_u16(), "Issuer metadata request rejected");
            return Err(failure(upstream_failure(response.status(), response.body())));
        }

        let metadata: ProviderMetadata = serde_json::from_slice(response.body())
            .map_err(|e| failure(format!("invalid metadata JSON: {e}")))?;
        let endpoints = IssuerEndpoints::from_metadata(issuer, metadata).map_err(failure)?;

        info!(
            issuer,
            authorization_endpoint = %endpoints.authorization_endpoint,
            "Discovered issuer metadata"
        );
        Ok(endpoints)
    }
}
