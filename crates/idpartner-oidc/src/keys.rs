//! Provider key cache
//!
//! Provider JWK sets are fetched lazily, the first time a response signed
//! with an unknown `kid` arrives. Entries are partitioned by `jwks_uri` so
//! kids of different issuers never collide; like discovery, the cache follows
//! one issuer at a time and a fetch for another `jwks_uri` evicts the rest.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{FederationError, Result, upstream_failure};
use crate::http::{self, HttpTransport};
use crate::jose::{Jose, Jwk};

type KeysByKid = HashMap<String, Jwk>;

/// Public provider keys, keyed by `jwks_uri` then `kid`
#[derive(Debug)]
pub struct ProviderKeyCache {
    transport: Arc<dyn HttpTransport>,
    jose: Arc<dyn Jose>,
    keys: RwLock<HashMap<String, KeysByKid>>,
}

impl ProviderKeyCache {
    pub fn new(transport: Arc<dyn HttpTransport>, jose: Arc<dyn Jose>) -> Self {
        Self {
            transport,
            jose,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Key `kid` published at `jwks_uri`, refreshing the set once on a miss
    ///
    /// # Errors
    ///
    /// Returns [`FederationError::ProviderKeys`] if the set cannot be fetched,
    /// or [`FederationError::UnknownKey`] if `kid` is still absent afterwards.
    pub async fn resolve(&self, jwks_uri: &Url, kid: &str) -> Result<Jwk> {
        if let Some(key) = self.cached(jwks_uri, kid).await {
            debug!(jwks_uri = %jwks_uri, kid, "Using cached provider key");
            return Ok(key);
        }

        let fetched = self.fetch(jwks_uri).await?;
        let found = fetched.get(kid).cloned();

        {
            let mut partitions = self.keys.write().await;
            partitions.retain(|uri, _| uri == jwks_uri.as_str());
            partitions
                .entry(jwks_uri.to_string())
                .or_default()
                .extend(fetched);
        }

        found.ok_or_else(|| {
            warn!(jwks_uri = %jwks_uri, kid, "Provider key set has no matching key");
            FederationError::UnknownKey(kid.to_string())
        })
    }

    async fn cached(&self, jwks_uri: &Url, kid: &str) -> Option<Jwk> {
        self.keys
            .read()
            .await
            .get(jwks_uri.as_str())
            .and_then(|partition| partition.get(kid))
            .cloned()
    }

    async fn fetch(&self, jwks_uri: &Url) -> Result<KeysByKid> {
        let failure = |reason: String| FederationError::ProviderKeys {
            jwks_uri: jwks_uri.to_string(),
            reason,
        };

        info!(jwks_uri = %jwks_uri, "Fetching provider JWKS");

        let request = http::get_json(jwks_uri.as_str(), None).map_err(|e| failure(e.to_string()))?;
        let response = self.transport.send(request).await.map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS");
            failure(e.to_string())
        })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %jwks_uri,
                status = response.status().as_u16(),
                "JWKS endpoint returned error status"
            );
            return Err(failure(upstream_failure(response.status(), response.body())));
        }

        let keys = self
            .jose
            .parse_jwk_set(response.body())
            .map_err(|e| failure(e.to_string()))?;

        let mut by_kid = KeysByKid::with_capacity(keys.len());
        for key in keys {
            match key.key_id().map(str::to_string) {
                Some(kid) => {
                    by_kid.insert(kid, key);
                }
                None => debug!(jwks_uri = %jwks_uri, "Skipping provider key without kid"),
            }
        }

        info!(jwks_uri = %jwks_uri, key_count = by_kid.len(), "Provider JWKS cached");
        Ok(by_kid)
    }
}
