//! Authorized request client.
//!
//! [`RequestClient`] attaches the current credential to every call. A 401 on
//! a non-exempt endpoint drives one renewal through the
//! [`RenewalCoordinator`] and one replay of the request; a second 401 or a
//! failed renewal surfaces to the caller unchanged.
//!
//! ```text
//!   send(req) ──► Transport ──► 2xx ─────────────────────► Ok(response)
//!                    │          4xx/5xx (not 401) ───────► Err(ServerRejection)
//!                    │          401, exempt or retried ──► Err(Authorization)
//!                    ▼
//!               401 ──► RenewalCoordinator ──► fresh credential
//!                                 │                  │
//!                                 ▼                  ▼
//!                      Err(Renewal(..))     replay once ──► result
//! ```
//!
//! # Modules
//!
//! - [`types`] - request/response types
//! - [`transport`] - network seam and the reqwest implementation

pub mod transport;
pub mod types;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use transport::{HttpTransport, Transport};
pub use types::{ApiRequest, ApiResponse};

use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::renewal::RenewalCoordinator;

/// Sends API calls with the session credential attached.
#[derive(Debug, Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
}

impl RequestClient {
    /// Creates a request client.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        renewal: Arc<RenewalCoordinator>,
    ) -> Self {
        Self {
            transport,
            credentials,
            renewal,
        }
    }

    /// Send a request, renewing the credential and replaying once on 401.
    ///
    /// # Errors
    ///
    /// - [`Error::Network`] if no response arrived
    /// - [`Error::Authorization`] if a 401 survived renewal or hit an exempt
    ///   endpoint
    /// - [`Error::Renewal`] if the renewal triggered by a 401 failed
    /// - [`Error::ServerRejection`] for any other non-success status
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let credential = self.credentials.access_credential();
        let response = self.transport.execute(&request, credential.as_ref()).await?;

        if response.status != 401 {
            return response.into_result();
        }

        if request.is_renewal_exempt() || request.is_retried() {
            log::debug!(
                "[Request] {} {} returned 401 (no renewal for this request)",
                request.method,
                request.route()
            );
            return Err(Error::Authorization);
        }

        log::info!(
            "[Request] {} {} returned 401, waiting for a fresh credential",
            request.method,
            request.route()
        );
        let fresh = self
            .renewal
            .obtain_fresh_credential(credential.as_ref())
            .await?;

        request.mark_retried();
        let response = self.transport.execute(&request, Some(&fresh)).await?;
        if response.status == 401 {
            log::warn!(
                "[Request] {} {} still unauthorized after renewal",
                request.method,
                request.route()
            );
            return Err(Error::Authorization);
        }
        response.into_result()
    }

    /// `GET path`, decoding the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// `POST path` with a JSON body, decoding the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        self.send(ApiRequest::post(path).json(body)).await?.json()
    }

    /// `PUT path` with no body, discarding the response body.
    pub async fn put(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::put(path)).await.map(|_| ())
    }

    /// `PUT path` with a JSON body, decoding the JSON response.
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        self.send(ApiRequest::put(path).json(body)).await?.json()
    }

    /// Send an arbitrary request and decode its JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.send(request).await?.json()
    }

    /// The credential store this client reads from.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| Error::InvalidResponse(format!("encode body: {e}")))
}
