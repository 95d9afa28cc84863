//! Login, logout, and startup bootstrap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use super::context::SessionContext;
use super::policy::AccountPolicy;
use super::state::{LogoutReason, SessionEvent, SessionState};
use crate::client::{ApiRequest, RequestClient};
use crate::constants::{LOGIN_PATH, LOGOUT_PATH, PROFILE_PATH};
use crate::credentials::{Credential, Profile};
use crate::error::{Error, Result};

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    credential: Credential,
    #[serde(default)]
    refresh_credential: Option<Credential>,
    /// Older servers omit this; it is fetched separately then.
    #[serde(default)]
    profile: Option<Profile>,
}

/// Owns the session's transitions in and out of `Authenticated`.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    client: RequestClient,
    context: Arc<SessionContext>,
    policy: AccountPolicy,
}

impl SessionLifecycle {
    /// Creates a lifecycle over `context`, checking accounts against `policy`.
    pub fn new(client: RequestClient, context: Arc<SessionContext>, policy: AccountPolicy) -> Self {
        Self {
            client,
            context,
            policy,
        }
    }

    /// Resume a stored session at startup.
    ///
    /// With no stored credential the session stays anonymous. Otherwise the
    /// profile is re-fetched; success opens the push channel, any failure
    /// clears the stored credential.
    pub async fn bootstrap(&self) -> SessionState {
        let Some(credential) = self.context.credentials().access_credential() else {
            log::debug!("[Session] No stored credential, staying anonymous");
            return self.context.state();
        };

        if !self
            .context
            .transition(SessionState::Anonymous, SessionState::Bootstrapping)
        {
            log::debug!("[Session] Bootstrap skipped, session is {}", self.context.state());
            return self.context.state();
        }

        log::info!("[Session] Validating stored credential");
        let profile = match self.client.get_json::<Profile>(PROFILE_PATH).await {
            Ok(profile) => profile,
            Err(e) => {
                log::warn!("[Session] Stored credential rejected: {}", e);
                self.abandon();
                return self.context.state();
            }
        };

        if let Err(e) = self.context.credentials().store_profile(profile.clone()) {
            log::warn!("[Session] Could not persist profile: {}", e);
        }

        // A renewal during the profile fetch may have replaced the credential.
        let credential = self
            .context
            .credentials()
            .access_credential()
            .unwrap_or(credential);
        // Failures here already ended the session; the state says so.
        let _ = self.establish(profile, &credential);
        self.context.state()
    }

    /// Sign in with `identifier` and `secret`.
    ///
    /// # Errors
    ///
    /// - the login call's error ([`Error::Authorization`] for bad secrets)
    /// - [`Error::AccountNotPermitted`] if the policy rejects the account,
    ///   after a forced logout
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Profile> {
        if self.context.state() != SessionState::Anonymous {
            log::info!("[Session] Login replaces the current {} session", self.context.state());
            self.context.push().close();
        }
        self.context.set_state(SessionState::Bootstrapping);
        log::info!("[Session] Signing in");

        let response: LoginResponse = match self
            .client
            .post_json(LOGIN_PATH, &LoginRequest { identifier, secret })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[Session] Login failed: {}", e);
                self.abandon();
                return Err(e);
            }
        };

        let credential = response.credential.clone();
        if let Err(e) = self.context.credentials().store_session(
            response.credential,
            response.refresh_credential,
            response.profile.clone(),
        ) {
            self.abandon();
            return Err(e);
        }

        let profile = match response.profile {
            Some(profile) => profile,
            None => match self.client.get_json::<Profile>(PROFILE_PATH).await {
                Ok(profile) => {
                    if let Err(e) = self.context.credentials().store_profile(profile.clone()) {
                        log::warn!("[Session] Could not persist profile: {}", e);
                    }
                    profile
                }
                Err(e) => {
                    log::warn!("[Session] Profile fetch after login failed: {}", e);
                    self.abandon();
                    return Err(e);
                }
            },
        };

        self.establish(profile.clone(), &credential)?;
        Ok(profile)
    }

    /// Sign out. The server call is best effort; local state is always
    /// cleared. Calling it again is harmless.
    pub async fn logout(&self) {
        if self.context.credentials().has_credential() {
            if let Err(e) = self.client.send(ApiRequest::post(LOGOUT_PATH)).await {
                log::debug!("[Session] Server logout failed (ignored): {}", e);
            }
        }
        self.context.sign_out();
    }

    /// End the session without the user asking. See
    /// [`SessionContext::force_logout`].
    pub fn force_logout(&self, reason: LogoutReason) -> bool {
        self.context.force_logout(reason)
    }

    /// Profile of the signed-in account.
    pub fn current_user(&self) -> Option<Profile> {
        if self.is_authenticated() {
            self.context.credentials().profile()
        } else {
            None
        }
    }

    /// Returns `true` while a validated session is held.
    pub fn is_authenticated(&self) -> bool {
        self.context.state().is_authenticated()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.context.state()
    }

    /// Session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.context.subscribe()
    }

    /// Session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.context.watch_state()
    }

    /// Shared session context.
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    /// Apply the account policy and, if it passes, go live.
    fn establish(&self, profile: Profile, credential: &Credential) -> Result<()> {
        if !self.policy.permits(&profile) {
            log::warn!(
                "[Session] Account {} not permitted by policy {:?}",
                profile.id,
                self.policy
            );
            self.context.force_logout(LogoutReason::AccountNotPermitted {
                role: profile.role.clone(),
            });
            return Err(Error::AccountNotPermitted);
        }

        if !self
            .context
            .transition(SessionState::Bootstrapping, SessionState::Authenticated)
        {
            log::warn!(
                "[Session] Session changed to {} while signing in",
                self.context.state()
            );
            return Err(Error::Authorization);
        }

        log::info!("[Session] Signed in as {}", profile.display_name());
        self.context.push().close();
        self.context.push().open(credential);
        self.context.emit(SessionEvent::SignedIn { profile });
        Ok(())
    }

    /// Drop a half-established session without a notice.
    fn abandon(&self) {
        if let Err(e) = self.context.credentials().clear() {
            log::warn!("[Session] Failed to clear stored credentials: {}", e);
        }
        self.context.push().close();
        self.context.set_state(SessionState::Anonymous);
    }
}
