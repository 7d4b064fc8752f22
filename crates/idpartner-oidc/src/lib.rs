//! # IDPartner OIDC - Federation Client
//!
//! OpenID Connect relying-party client for the IDPartner account-selector
//! flow: Authorization Code with PKCE, pushed authorization requests
//! (RFC 9126), signed request objects and JWT-secured authorization responses
//! (JARM), optionally encrypted.
//!
//! ## Flow
//!
//! 1. [`FederationClient::generate_proofs`] issues `state`, `nonce` and the
//!    PKCE verifier. The caller keeps them (e.g. in the session).
//! 2. [`FederationClient::authorization_url`] returns the account-selector URL
//!    while no issuer is known, or discovers the issuer, pushes the
//!    authorization request and returns the provider's authorization URL.
//! 3. [`FederationClient::exchange_code`] decrypts and verifies the callback
//!    response against the provider's keys and exchanges the code for tokens.
//! 4. [`FederationClient::fetch_userinfo`] retrieves the userinfo claims.
//!
//! [`FederationClient::public_jwks`] exposes the public half of the client's
//! key set for the provider to fetch.
//!
//! ## Architecture
//!
//! - [`config`] - Client configuration, file/env loading and validation
//! - [`proofs`] - `state`/`nonce`/PKCE generation
//! - [`discovery`] - Issuer metadata discovery and cache
//! - [`authorization`] - Selector URL, authorization parameters, PAR
//! - [`callback`] - Response decoding/verification, token and userinfo calls
//! - [`keys`] - Provider JWKS cache
//! - [`http`] - Injectable HTTP transport (`reqwest` by default)
//! - [`jose`] - Injectable JOSE operations (`jsonwebtoken` + `josekit`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idpartner_oidc::{
//!     AuthorizationQuery, AuthorizationRequest, CallbackQuery, ClientConfig, FederationClient,
//! };
//!
//! # async fn example(callback: CallbackQuery) -> idpartner_oidc::Result<()> {
//! let client = FederationClient::new(ClientConfig::from_file("idpartner.toml")?)?;
//!
//! let proofs = client.generate_proofs();
//! let query = AuthorizationQuery {
//!     iss: Some("https://op.example.com".to_string()),
//!     ..Default::default()
//! };
//! let request = AuthorizationRequest::new(["openid", "email"]).with_prompt("consent");
//! let redirect = client.authorization_url(&query, &proofs, &request).await?;
//!
//! // ... the provider redirects back to the callback ...
//! let tokens = client.exchange_code(&callback, &proofs).await?;
//! if let Some(access_token) = tokens.access_token() {
//!     let userinfo = client.fetch_userinfo(access_token).await?;
//!     println!("{redirect} -> {:?}", userinfo.subject());
//! }
//! # Ok(())
//! # }
//! ```

pub mod authorization;
pub mod callback;
mod client;
mod client_auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod jose;
pub mod keys;
pub mod proofs;

pub use authorization::{
    AuthorizationQuery, AuthorizationRequest, ClaimsRequest, PushedAuthorizationResponse,
};
pub use callback::{CallbackQuery, TokenResponse, UserInfo};
pub use client::FederationClient;
pub use client_auth::CLIENT_ASSERTION_TYPE;
pub use config::{
    ClientConfig, RequestObjectPolicy, ResolvedConfig, TokenEndpointAuthMethod,
    DEFAULT_ACCOUNT_SELECTOR_URL,
};
pub use discovery::{DiscoveryClient, IssuerEndpoints};
pub use error::{FederationError, Result};
pub use http::{HttpTransport, ReqwestTransport, TransportError};
pub use jose::{Jose, JoseError, Jwk, StandardJose};
pub use proofs::{Proofs, code_challenge, generate_proofs};
