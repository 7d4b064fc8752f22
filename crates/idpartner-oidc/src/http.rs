//! HTTP transport capability
//!
//! Every network round trip the client makes (discovery, PAR, token exchange,
//! userinfo, provider JWKS) goes through [`HttpTransport`]. The default
//! implementation, [`ReqwestTransport`], is a thin adapter over `reqwest`;
//! callers can inject their own transport (proxies, mTLS for
//! `tls_client_auth`, instrumentation).
//!
//! ## Security Configuration
//!
//! The default transport is configured to:
//! - NOT follow redirects (SSRF protection per OAuth2 security guidance)
//! - Apply a request timeout (30 seconds unless configured otherwise)
//! - Use rustls for TLS (no OpenSSL dependency on the transport path)

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use thiserror::Error;
use url::form_urlencoded;

/// Request type handed to the transport
pub type HttpRequest = http::Request<Vec<u8>>;
/// Response type returned by the transport
pub type HttpResponse = http::Response<Vec<u8>>;

/// Default timeout applied by [`ReqwestTransport`]
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Error type for transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request execution failed (connect, TLS, timeout)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response body read failed
    #[error("Failed to read response body: {0}")]
    BodyRead(String),
}

/// Generic request/response capability used for all upstream calls
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Execute one request and return the full response, whatever its status
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] only when no response was obtained.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// HTTP transport backed by `reqwest`
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with security-hardened defaults
    ///
    /// # Errors
    ///
    /// Returns error if the underlying client cannot be constructed (TLS backend
    /// initialization failure).
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a transport with a custom request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the underlying client cannot be constructed.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent(format!("idpartner-oidc/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { inner })
    }

    /// Create from an existing reqwest client
    ///
    /// # Warning
    /// Ensure the client is configured with `redirect::Policy::none()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (parts, body) = request.into_parts();

        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("Invalid method: {}", parts.method)))?;

        let mut req_builder = self.inner.request(method, parts.uri.to_string());
        for (name, value) in &parts.headers {
            req_builder = req_builder.header(name.as_str(), value.as_bytes());
        }

        let response = req_builder.body(body).send().await?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|_| TransportError::BodyRead("Invalid status code".to_string()))?;

        let mut builder = http::Response::builder().status(status);
        for (name, value) in response.headers() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::BodyRead(e.to_string()))?;

        builder
            .body(body_bytes.to_vec())
            .map_err(|e| TransportError::BodyRead(e.to_string()))
    }
}

/// Build a `GET` request expecting JSON
pub(crate) fn get_json(uri: &str, authorization: Option<&str>) -> Result<HttpRequest, TransportError> {
    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(ACCEPT, JSON_CONTENT_TYPE);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, header_value(value)?);
    }
    builder
        .body(Vec::new())
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

/// Build a form-encoded `POST` request expecting JSON
pub(crate) fn post_form(
    uri: &str,
    authorization: Option<&str>,
    params: &[(String, String)],
) -> Result<HttpRequest, TransportError> {
    let body = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    let mut builder = http::Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
        .header(ACCEPT, JSON_CONTENT_TYPE);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, header_value(value)?);
    }
    builder
        .body(body.into_bytes())
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

/// `Basic base64(client_id:client_secret)` per RFC 6749 section 2.3.1
pub(crate) fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{client_secret}")))
}

/// `Bearer <token>` per RFC 6750
pub(crate) fn bearer_authorization(access_token: &str) -> String {
    format!("Bearer {access_token}")
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("Invalid header value: {e}")))?;
    header.set_sensitive(true);
    Ok(header)
}
