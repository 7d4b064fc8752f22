//! Integration tests for the callback: response verification, code exchange
//! and userinfo
//!
//! Tests cover:
//! - Signed (JWS) and encrypted (JWE over JWS) authorization responses
//! - Provider key resolution by `kid` and key caching
//! - Integrity failures (unknown key, bad signature, state mismatch)
//! - Token and userinfo calls, including upstream failure reporting
//!
//! # Standards Tested
//! - JARM: JWT Secured Authorization Response Mode for OAuth 2.0
//! - RFC 7516: JSON Web Encryption
//! - RFC 6749 section 4.1.3: Access Token Request

mod common;

use chrono::Utc;
use common::{CLIENT_ID, MockProvider, REDIRECT_URI, basic_config, client, encrypt, rsa_key, sign};
use idpartner_oidc::{CallbackQuery, FederationClient, FederationError, Proofs};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn jarm_payload(provider: &MockProvider, code: &str, proofs: &Proofs) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": provider.issuer,
        "aud": CLIENT_ID,
        "exp": now + 300,
        "code": code,
        "state": proofs.state,
    })
}

async fn discovered_client(provider: &MockProvider) -> FederationClient {
    provider.mock_discovery(1).await;
    client(basic_config())
}

#[tokio::test]
async fn test_signed_response_exchanged_for_tokens() {
    // GIVEN: A provider publishing its signing key and issuing tok-A
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    provider.mock_token_success(json!({ "access_token": "tok-A" })).await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();

    // WHEN: The callback carries a three-segment signed response
    let response = provider.sign_response(jarm_payload(&provider, "code-A", &proofs));
    assert_eq!(response.split('.').count(), 3);
    let query = CallbackQuery::new(response).with_issuer(&provider.issuer);
    let tokens = client.exchange_code(&query, &proofs).await.unwrap();

    // THEN: The token response is returned verbatim
    assert_eq!(tokens.clone().into_value(), json!({ "access_token": "tok-A" }));
    assert_eq!(tokens.access_token(), Some("tok-A"));

    let requests = provider.requests_to("/token").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers["authorization"].to_str().unwrap(),
        "Basic Q0xJRU5UX0lEOkNMSUVOVF9TRUNSRVQ="
    );
    let body = common::form(&requests[0].body);
    assert_eq!(body.len(), 4);
    assert_eq!(body["code"], "code-A");
    assert_eq!(body["code_verifier"], proofs.code_verifier);
    assert_eq!(body["grant_type"], "authorization_code");
    assert_eq!(body["redirect_uri"], REDIRECT_URI);
}

#[tokio::test]
async fn test_encrypted_response_exchanged_for_tokens() {
    // GIVEN: A client with an encryption key
    let provider = MockProvider::start().await;
    provider.mock_discovery(1).await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    provider.mock_token_success(json!({ "access_token": "tok-B" })).await;

    let sig = rsa_key("sig", "PS256", "client-sig-1");
    let enc = rsa_key("enc", "RSA-OAEP", "client-enc-1");
    let client = client(basic_config().with_jwks(common::private_jwks(&[&sig, &enc])));
    let proofs = client.generate_proofs();

    // WHEN: The callback carries a five-segment encrypted response
    let inner = provider.sign_response(jarm_payload(&provider, "code-B", &proofs));
    let response = encrypt(&inner, &enc);
    assert_eq!(response.split('.').count(), 5);
    let tokens = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap();

    // THEN: The inner code was exchanged exactly like a signed response
    assert_eq!(tokens.access_token(), Some("tok-B"));
    let bodies = provider.form_bodies("/token").await;
    assert_eq!(bodies[0]["code"], "code-B");
}

#[tokio::test]
async fn test_provider_keys_fetched_once() {
    // GIVEN: Two callbacks signed with the same provider key
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    provider.mock_token_success(json!({ "access_token": "tok-A" })).await;
    let client = discovered_client(&provider).await;

    // WHEN
    for code in ["code-1", "code-2"] {
        let proofs = client.generate_proofs();
        let response = provider.sign_response(jarm_payload(&provider, code, &proofs));
        client
            .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
            .await
            .unwrap();
    }

    // THEN: The JWKS mock's expectation of one fetch holds
    assert_eq!(provider.requests_to("/token").await.len(), 2);
}

#[tokio::test]
async fn test_callback_without_iss_uses_current_issuer() {
    // GIVEN: An issuer discovered during the authorization step
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    provider.mock_token_success(json!({ "access_token": "tok-A" })).await;
    let client = discovered_client(&provider).await;
    client.discover(&provider.issuer).await.unwrap();
    let proofs = client.generate_proofs();

    // WHEN: The callback has no iss parameter
    let response = provider.sign_response(jarm_payload(&provider, "code-A", &proofs));
    let tokens = client.exchange_code(&CallbackQuery::new(response), &proofs).await.unwrap();

    // THEN
    assert_eq!(tokens.access_token(), Some("tok-A"));
}

#[tokio::test]
async fn test_unknown_kid_rejected() {
    // GIVEN: A response signed with a key the provider does not publish
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();

    let rotated = rsa_key("sig", "PS256", "rotated-key");
    let response = sign(&jarm_payload(&provider, "code-A", &proofs), &rotated);

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN: No token call is made
    assert!(matches!(err, FederationError::UnknownKey(ref kid) if kid == "rotated-key"));
    assert!(err.is_integrity_failure());
    assert!(provider.requests_to("/token").await.is_empty());
}

#[tokio::test]
async fn test_forged_signature_rejected() {
    // GIVEN: A response signed by an attacker reusing the provider's kid
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();

    let forged_key = rsa_key("sig", "PS256", "provider-sig-1");
    let response = sign(&jarm_payload(&provider, "code-A", &proofs), &forged_key);

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN
    assert!(matches!(err, FederationError::SignatureVerification(_)), "{err:?}");
    assert!(provider.requests_to("/token").await.is_empty());
}

#[tokio::test]
async fn test_response_from_other_issuer_rejected() {
    // GIVEN: A validly signed response naming a different issuer
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();

    let mut payload = jarm_payload(&provider, "code-A", &proofs);
    payload["iss"] = json!("https://other-idp.example.com");
    let response = provider.sign_response(payload);

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN: The code never reaches the discovered token endpoint
    assert!(matches!(err, FederationError::InvalidResponse(_)), "{err:?}");
    assert!(provider.requests_to("/token").await.is_empty());
}

#[tokio::test]
async fn test_state_mismatch_rejected() {
    // GIVEN: A response issued for another attempt
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    let client = discovered_client(&provider).await;
    let other_attempt = client.generate_proofs();
    let proofs = client.generate_proofs();

    let response = provider.sign_response(jarm_payload(&provider, "code-A", &other_attempt));

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN
    assert!(matches!(err, FederationError::StateMismatch));
    assert!(provider.requests_to("/token").await.is_empty());
}

#[tokio::test]
async fn test_error_response_is_denied() {
    // GIVEN: A signed error response
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();

    let response = provider.sign_response(json!({
        "iss": provider.issuer,
        "error": "access_denied",
        "error_description": "The user declined",
        "state": proofs.state,
    }));

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN
    assert_eq!(err.to_string(), "Authorization denied: access_denied (The user declined)");
}

#[tokio::test]
async fn test_plain_error_query_is_denied_without_io() {
    // GIVEN: A provider that redirected back with a plain OAuth error
    let provider = MockProvider::start().await;
    provider.mock_discovery(0).await;
    let client = client(basic_config());
    let query = CallbackQuery {
        iss: Some(provider.issuer.clone()),
        error: Some("login_required".to_string()),
        ..Default::default()
    };

    // WHEN
    let err = client
        .exchange_code(&query, &client.generate_proofs())
        .await
        .unwrap_err();

    // THEN
    assert!(matches!(
        err,
        FederationError::AuthorizationDenied { ref error, .. } if error == "login_required"
    ));
}

#[tokio::test]
async fn test_token_failure_embeds_body() {
    // GIVEN: A token endpoint rejecting the code
    let provider = MockProvider::start().await;
    provider.mock_jwks(&[&provider.signing_key], 1).await;
    provider
        .mock_token_failure(400, r#"{"error":"invalid_grant"}"#)
        .await;
    let client = discovered_client(&provider).await;
    let proofs = client.generate_proofs();
    let response = provider.sign_response(jarm_payload(&provider, "code-A", &proofs));

    // WHEN
    let err = client
        .exchange_code(&CallbackQuery::new(response).with_issuer(&provider.issuer), &proofs)
        .await
        .unwrap_err();

    // THEN
    assert!(matches!(err, FederationError::TokenExchange { .. }));
    assert!(err.to_string().contains(r#"HTTP 400: {"error":"invalid_grant"}"#), "{err}");
}

#[tokio::test]
async fn test_userinfo_success() {
    // GIVEN: A discovered issuer with a userinfo endpoint
    let provider = MockProvider::start().await;
    provider
        .mock_userinfo(200, r#"{"sub":"user-1","email":"user@example.com"}"#)
        .await;
    let client = discovered_client(&provider).await;
    client.discover(&provider.issuer).await.unwrap();

    // WHEN
    let userinfo = client.fetch_userinfo("tok-A").await.unwrap();

    // THEN: Claims are returned verbatim and the token was sent as a bearer
    assert_eq!(userinfo.subject(), Some("user-1"));
    assert_eq!(
        userinfo.into_value(),
        json!({ "sub": "user-1", "email": "user@example.com" })
    );
    let requests = provider.requests_to("/me").await;
    assert_eq!(
        requests[0].headers["authorization"].to_str().unwrap(),
        "Bearer tok-A"
    );
}

#[tokio::test]
async fn test_userinfo_failure_embeds_body() {
    // GIVEN: A userinfo endpoint rejecting the token
    let provider = MockProvider::start().await;
    provider.mock_userinfo(401, r#"{"error":"invalid_token"}"#).await;
    let client = discovered_client(&provider).await;
    client.discover(&provider.issuer).await.unwrap();

    // WHEN
    let err = client.fetch_userinfo("expired").await.unwrap_err();

    // THEN
    assert!(matches!(err, FederationError::UserInfo { .. }));
    assert!(err.to_string().contains(r#"HTTP 401: {"error":"invalid_token"}"#));
}
