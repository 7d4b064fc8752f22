//! Client authentication at the PAR and token endpoints

use chrono::Utc;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use url::Url;
use uuid::Uuid;

use crate::config::{ResolvedConfig, TokenEndpointAuthMethod};
use crate::error::{FederationError, Result};
use crate::http::basic_authorization;
use crate::jose::{Jose, SigningAlgorithm};

/// `client_assertion_type` for `private_key_jwt` (RFC 7523 section 2.2)
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of a client assertion in seconds
const CLIENT_ASSERTION_LIFETIME_SECS: i64 = 60;

/// Credentials to attach to one endpoint request
#[derive(Debug, Default)]
pub(crate) struct ClientCredentials {
    /// `Authorization` header value
    pub authorization: Option<String>,
    /// Extra form parameters
    pub params: Vec<(String, String)>,
}

/// Credentials for a request to `endpoint` under the configured method
///
/// # Errors
///
/// Returns [`FederationError::Config`] when `client_secret_basic` has no
/// secret, or a client assertion cannot be signed.
pub(crate) fn credentials_for(
    config: &ResolvedConfig,
    jose: &dyn Jose,
    endpoint: &Url,
) -> Result<ClientCredentials> {
    let basic = config.client_secret().map(|secret| ClientCredentials {
        authorization: Some(basic_authorization(
            config.client_id(),
            secret.expose_secret(),
        )),
        params: Vec::new(),
    });
    let client_id_only = || ClientCredentials {
        authorization: None,
        params: vec![("client_id".to_string(), config.client_id().to_string())],
    };

    match (config.token_endpoint_auth_method(), config.keys()) {
        (TokenEndpointAuthMethod::ClientSecretBasic, _) => basic.ok_or_else(|| {
            FederationError::config("client_secret_basic requires a client_secret")
        }),
        (TokenEndpointAuthMethod::PrivateKeyJwt, Some(keys)) => {
            let claims = assertion_claims(config.client_id(), endpoint);
            let assertion = jose.sign_jwt(&claims, keys.signing(), SigningAlgorithm::Ps256)?;
            let mut credentials = client_id_only();
            credentials.params.extend([
                (
                    "client_assertion_type".to_string(),
                    CLIENT_ASSERTION_TYPE.to_string(),
                ),
                ("client_assertion".to_string(), assertion),
            ]);
            Ok(credentials)
        }
        // The TLS layer authenticates the client; a secret is still sent when configured
        (TokenEndpointAuthMethod::TlsClientAuth | TokenEndpointAuthMethod::PrivateKeyJwt, _) => {
            Ok(basic.unwrap_or_else(client_id_only))
        }
    }
}

fn assertion_claims(client_id: &str, endpoint: &Url) -> Map<String, Value> {
    let iat = Utc::now().timestamp();
    let mut claims = Map::new();
    claims.insert("iss".to_string(), json!(client_id));
    claims.insert("sub".to_string(), json!(client_id));
    claims.insert("aud".to_string(), json!(endpoint.as_str()));
    claims.insert("jti".to_string(), json!(Uuid::new_v4().to_string()));
    claims.insert("iat".to_string(), json!(iat));
    claims.insert("exp".to_string(), json!(iat + CLIENT_ASSERTION_LIFETIME_SECS));
    claims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::jose::test_keys::rsa_key;
    use crate::jose::{StandardJose, members};

    fn endpoint() -> Url {
        Url::parse("https://op.example.com/token").unwrap()
    }

    fn config(method: &str) -> ClientConfig {
        ClientConfig::new("client-1", "https://rp.example.com/cb").with_token_endpoint_auth_method(method)
    }

    #[test]
    fn test_basic_requires_secret() {
        let resolved = config("client_secret_basic").resolve().unwrap();
        let err = credentials_for(&resolved, &StandardJose, &endpoint()).unwrap_err();
        assert!(matches!(err, FederationError::Config(_)));

        let resolved = config("client_secret_basic")
            .with_client_secret("s3cret")
            .resolve()
            .unwrap();
        let credentials = credentials_for(&resolved, &StandardJose, &endpoint()).unwrap();
        assert_eq!(
            credentials.authorization.as_deref(),
            Some(basic_authorization("client-1", "s3cret").as_str())
        );
        assert!(credentials.params.is_empty());
    }

    #[test]
    fn test_tls_without_secret_sends_client_id() {
        let resolved = config("tls_client_auth").resolve().unwrap();
        let credentials = credentials_for(&resolved, &StandardJose, &endpoint()).unwrap();
        assert!(credentials.authorization.is_none());
        assert_eq!(
            credentials.params,
            vec![("client_id".to_string(), "client-1".to_string())]
        );
    }

    #[test]
    fn test_private_key_jwt_assertion() {
        let sig = rsa_key("sig", "PS256", "sig-1");
        let jwks = json!({ "keys": [members(&sig)] }).to_string();
        let resolved = config("private_key_jwt").with_jwks(jwks).resolve().unwrap();

        let credentials = credentials_for(&resolved, &StandardJose, &endpoint()).unwrap();
        assert!(credentials.authorization.is_none());
        assert_eq!(credentials.params[1].1, CLIENT_ASSERTION_TYPE);

        let public = StandardJose.public_from_private(&sig).unwrap();
        let claims = StandardJose.verify_jws(&credentials.params[2].1, &public).unwrap();
        assert_eq!(claims["iss"], "client-1");
        assert_eq!(claims["sub"], "client-1");
        assert_eq!(claims["aud"], "https://op.example.com/token");
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            60
        );
        assert!(claims["jti"].as_str().is_some());
    }

    #[test]
    fn test_private_key_jwt_without_keys_falls_back() {
        let resolved = config("private_key_jwt")
            .with_client_secret("s3cret")
            .resolve()
            .unwrap();
        let credentials = credentials_for(&resolved, &StandardJose, &endpoint()).unwrap();
        assert!(credentials.authorization.is_some());
    }
}
