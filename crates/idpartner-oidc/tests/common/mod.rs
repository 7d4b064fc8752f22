//! Common test utilities for integration tests
//!
//! This module provides a mock OpenID provider (discovery, PAR, token,
//! userinfo and JWKS endpoints) plus key and response helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;

use idpartner_oidc::jose::{ENCRYPTION_ENC, members};
use idpartner_oidc::{ClientConfig, FederationClient, Jose, Jwk, StandardJose};
use josekit::jwe::{self, JweHeader, RSA_OAEP};
use serde_json::{Map, Value, json};
use url::form_urlencoded;
use wiremock::{
    Mock, MockServer, Request, ResponseTemplate,
    matchers::{method, path},
};

pub const CLIENT_ID: &str = "CLIENT_ID";
pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
pub const REDIRECT_URI: &str = "http://localhost:3001/button/oauth/callback";

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "idpartner_oidc=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Mock OpenID provider
pub struct MockProvider {
    pub server: MockServer,
    pub issuer: String,
    /// Provider response-signing key (private)
    pub signing_key: Jwk,
}

impl MockProvider {
    /// Start a provider with a fresh signing key `provider-sig-1`
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();

        Self {
            server,
            issuer,
            signing_key: rsa_key("sig", "PS256", "provider-sig-1"),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.issuer)
    }

    /// Discovery document pointing at this server
    pub fn metadata(&self) -> Value {
        json!({
            "issuer": self.issuer,
            "authorization_endpoint": self.endpoint("/auth"),
            "token_endpoint": self.endpoint("/token"),
            "userinfo_endpoint": self.endpoint("/me"),
            "pushed_authorization_request_endpoint": self.endpoint("/request"),
            "jwks_uri": self.endpoint("/jwks"),
        })
    }

    /// Mock the discovery document, expecting exactly `times` fetches
    pub async fn mock_discovery(&self, times: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.metadata()))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    pub async fn mock_discovery_failure(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful PAR response
    pub async fn mock_par_success(&self, request_uri: &str) {
        Mock::given(method("POST"))
            .and(path("/request"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "request_uri": request_uri,
                "expires_in": 60,
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_par_failure(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/request"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Mock a successful token exchange returning `body` verbatim
    pub async fn mock_token_success(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_token_failure(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_userinfo(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", "application/json")
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
    }

    /// Publish the public half of `keys` at the JWKS endpoint
    pub async fn mock_jwks(&self, keys: &[&Jwk], times: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(public_jwks(keys)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Sign a JARM response payload with the provider key
    pub fn sign_response(&self, claims: Value) -> String {
        sign(&claims, &self.signing_key)
    }

    /// Requests received at `path`, in order
    pub async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == request_path)
            .collect()
    }

    /// Form bodies received at `path`, in order
    pub async fn form_bodies(&self, request_path: &str) -> Vec<HashMap<String, String>> {
        self.requests_to(request_path)
            .await
            .iter()
            .map(|request| form(&request.body))
            .collect()
    }
}

/// Parse a form-encoded body
pub fn form(body: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(body).into_owned().collect()
}

/// Fresh 2048-bit RSA key
pub fn rsa_key(key_use: &str, alg: &str, kid: &str) -> Jwk {
    let mut jwk = Jwk::generate_rsa_key(2048).expect("RSA key generation");
    jwk.set_key_use(key_use);
    jwk.set_algorithm(alg);
    jwk.set_key_id(kid);
    jwk
}

/// Private JWK set document (client configuration form)
pub fn private_jwks(keys: &[&Jwk]) -> String {
    let keys: Vec<_> = keys.iter().map(|key| members(key).clone()).collect();
    json!({ "keys": keys }).to_string()
}

/// Public JWK set document
pub fn public_jwks(keys: &[&Jwk]) -> Value {
    let keys: Vec<_> = keys
        .iter()
        .map(|key| {
            let public = StandardJose.public_from_private(key).expect("public key");
            Value::Object(members(&public).clone())
        })
        .collect();
    json!({ "keys": keys })
}

/// PS256-sign `claims` with `key`
pub fn sign(claims: &Value, key: &Jwk) -> String {
    let claims: Map<String, Value> = claims.as_object().cloned().expect("claims object");
    StandardJose
        .sign_jwt(&claims, key, idpartner_oidc::jose::SigningAlgorithm::Ps256)
        .expect("signing")
}

/// Wrap a JWS in a JWE (RSA-OAEP / A256CBC-HS512) for `enc_key`
pub fn encrypt(inner: &str, enc_key: &Jwk) -> String {
    let public = StandardJose.public_from_private(enc_key).expect("public key");
    let mut header = JweHeader::new();
    header.set_content_encryption(ENCRYPTION_ENC);
    header.set_content_type("JWT");
    if let Some(kid) = enc_key.key_id() {
        header.set_key_id(kid);
    }
    let encrypter = RSA_OAEP.encrypter_from_jwk(&public).expect("encrypter");
    jwe::serialize_compact(inner.as_bytes(), &header, &encrypter).expect("encryption")
}

/// Client configuration using the basic secret
pub fn basic_config() -> ClientConfig {
    ClientConfig::new(CLIENT_ID, REDIRECT_URI).with_client_secret(CLIENT_SECRET)
}

/// Client over the real `reqwest` transport
pub fn client(config: ClientConfig) -> FederationClient {
    init_tracing();
    FederationClient::new(config).expect("client")
}
