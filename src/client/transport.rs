//! Wire transport for API calls.
//!
//! [`Transport`] is the seam between the request/renewal logic and the
//! network. [`HttpTransport`] is the reqwest implementation; tests swap in
//! scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{ApiRequest, ApiResponse};
use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Executes a single request. No retries, no renewal.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `request`, attaching `credential` as a bearer token when present.
    ///
    /// Any HTTP status is a successful `ApiResponse`; only a missing response
    /// (connect failure, timeout, broken body) is an error.
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    server_url: String,
}

impl HttpTransport {
    /// Creates a transport for `server_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, server_url))
    }

    /// Creates a transport with a pre-configured HTTP client.
    pub fn with_client(client: Client, server_url: impl Into<String>) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Self { client, server_url }
    }

    /// Returns the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.server_url, request.path);
        log::debug!("[Request] {} {}", request.method, request.path);

        let mut builder = self.client.request(request.method.clone(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(credential) = credential {
            builder = builder.header(reqwest::header::AUTHORIZATION, credential.bearer());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            log::warn!("[Request] {} {} failed: {}", request.method, request.path, e);
            Error::Network(e.to_string())
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response body: {e}")))?;

        log::trace!(
            "[Request] {} {} -> {} ({} bytes)",
            request.method,
            request.path,
            status,
            body.len()
        );
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
