//! Single-flight credential renewal.
//!
//! Every 401 funnels into [`RenewalCoordinator::obtain_fresh_credential`].
//! The first caller opens a [`RenewalTicket`] and spawns the one refresh call;
//! callers arriving while the ticket is open only add a completion handle to
//! it. When the refresh settles, every handle receives the same outcome and
//! the ticket is dropped.
//!
//! ```text
//!  caller A ──401──► obtain ──► no ticket ──► open ticket, spawn refresh ─┐
//!  caller B ──401──► obtain ──► ticket open ──► push waiter               │
//!  caller C ──401──► obtain ──► ticket open ──► push waiter               │
//!                                                                          ▼
//!                        POST /auth/refresh (no 401 retry, bounded by timeout)
//!                                   │
//!                 ok: store credential, resolve A, B, C with it
//!                 err: forced logout once, reject A, B, C with the same error
//! ```
//!
//! A result is only stored if the session still holds the refresh credential
//! the call was made with. A logout (or a new login) during the call turns
//! the outcome into [`RenewalFailure::SessionEnded`], which ends nothing.
//!
//! The refresh runs on its own task, so a caller that stops waiting never
//! strands the others.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::client::{ApiRequest, Transport};
use crate::constants::REFRESH_PATH;
use crate::credentials::Credential;
use crate::error::{Error, RenewalFailure, Result};
use crate::session::{LogoutReason, SessionContext};

type RenewalOutcome = std::result::Result<Credential, RenewalFailure>;

/// Response from POST /auth/refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    credential: Credential,
    /// Present when the server rotates refresh credentials.
    #[serde(default)]
    refresh_credential: Option<Credential>,
}

/// The one in-flight renewal attempt and everyone waiting on it.
#[derive(Debug)]
struct RenewalTicket {
    waiters: Vec<oneshot::Sender<RenewalOutcome>>,
}

/// Coordinates credential renewal so at most one refresh call is in transit.
#[derive(Debug)]
pub struct RenewalCoordinator {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    timeout: Duration,
    ticket: Mutex<Option<RenewalTicket>>,
}

impl RenewalCoordinator {
    /// Creates a coordinator bounded by `timeout` per renewal attempt.
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionContext>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            timeout,
            ticket: Mutex::new(None),
        }
    }

    /// Obtain a credential that the server should accept.
    ///
    /// `rejected` is the credential the caller's 401 was observed with. If no
    /// renewal is in flight and the store already holds a different
    /// credential, a renewal finished after the caller sent its request and
    /// the current credential is returned without another refresh call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Renewal`] with the failure every waiter of this
    /// attempt observes.
    pub async fn obtain_fresh_credential(
        self: &Arc<Self>,
        rejected: Option<&Credential>,
    ) -> Result<Credential> {
        let (waiter_tx, waiter_rx) = oneshot::channel();

        {
            let mut ticket = self.ticket.lock().expect("RenewalTicket mutex poisoned");
            if let Some(open) = ticket.as_mut() {
                open.waiters.push(waiter_tx);
                log::debug!(
                    "[Renewal] Joined in-flight renewal ({} waiting)",
                    open.waiters.len()
                );
            } else {
                if let (Some(rejected), Some(current)) =
                    (rejected, self.session.credentials().access_credential())
                {
                    if &current != rejected {
                        log::debug!("[Renewal] Credential already renewed, reusing it");
                        return Ok(current);
                    }
                }

                *ticket = Some(RenewalTicket {
                    waiters: vec![waiter_tx],
                });
                log::info!("[Renewal] Starting credential renewal");
                self.session.begin_renewal();
                tokio::spawn(Arc::clone(self).run_renewal());
            }
        }

        match waiter_rx.await {
            Ok(Ok(credential)) => Ok(credential),
            Ok(Err(failure)) => Err(Error::Renewal(failure)),
            Err(_) => Err(Error::Renewal(RenewalFailure::Abandoned)),
        }
    }

    /// Returns `true` while a renewal attempt is open.
    pub fn is_renewing(&self) -> bool {
        self.ticket
            .lock()
            .expect("RenewalTicket mutex poisoned")
            .is_some()
    }

    async fn run_renewal(self: Arc<Self>) {
        // Settles waiters with Abandoned if this task unwinds before settling.
        let guard = scopeguard::guard(Arc::clone(&self), |coordinator| {
            coordinator.settle(&Err(RenewalFailure::Abandoned));
        });

        let issued_with = self.session.credentials().refresh_credential();
        let outcome = match tokio::time::timeout(self.timeout, self.refresh()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RenewalFailure::TimedOut),
        };
        // A failure for a session that is already gone must not end its successor.
        let outcome = match outcome {
            Err(_) if self.session.credentials().refresh_credential() != issued_with => {
                Err(RenewalFailure::SessionEnded)
            }
            outcome => outcome,
        };

        match &outcome {
            Ok(credential) => {
                log::info!("[Renewal] Credential renewed");
                self.session.finish_renewal(credential);
            }
            Err(RenewalFailure::SessionEnded) => {
                log::info!("[Renewal] Session ended during renewal, discarding result");
            }
            Err(failure) => {
                log::warn!("[Renewal] Renewal failed: {}", failure);
                self.session
                    .force_logout(LogoutReason::RenewalFailed(failure.clone()));
            }
        }

        scopeguard::ScopeGuard::into_inner(guard).settle(&outcome);
    }

    /// Issue the refresh call and persist its result.
    async fn refresh(&self) -> RenewalOutcome {
        let refresh = self
            .session
            .credentials()
            .refresh_credential()
            .ok_or(RenewalFailure::NoRefreshCredential)?;

        let request = ApiRequest::post(REFRESH_PATH)
            .json(serde_json::json!({ "refreshCredential": refresh.expose() }));

        let response = self
            .transport
            .execute(&request, None)
            .await
            .map_err(|e| match e {
                Error::Network(msg) => RenewalFailure::Network(msg),
                other => RenewalFailure::Network(other.to_string()),
            })?;

        match response.status {
            200..=299 => {}
            401 | 403 => return Err(RenewalFailure::Rejected),
            status => return Err(RenewalFailure::Server { status }),
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RenewalFailure::InvalidResponse(e.to_string()))?;

        let stored = self
            .session
            .credentials()
            .replace_credential(&refresh, body.credential.clone(), body.refresh_credential)
            .map_err(|e| {
                RenewalFailure::InvalidResponse(format!("could not persist credential: {e}"))
            })?;
        if !stored {
            return Err(RenewalFailure::SessionEnded);
        }

        Ok(body.credential)
    }

    /// Close the ticket and hand `outcome` to every waiter.
    fn settle(&self, outcome: &RenewalOutcome) {
        let ticket = self
            .ticket
            .lock()
            .expect("RenewalTicket mutex poisoned")
            .take();
        let Some(ticket) = ticket else {
            return;
        };
        log::debug!("[Renewal] Settling {} waiter(s)", ticket.waiters.len());
        for waiter in ticket.waiters {
            // A waiter that stopped listening just drops the result.
            let _ = waiter.send(outcome.clone());
        }
    }
}
