//! State shared by the session lifecycle and the renewal coordinator.
//!
//! Both sides can end a session, so teardown lives here rather than in
//! either of them. The state cell doubles as the exactly-once guard: only the
//! caller that moves the state into `Terminating` tears the session down and
//! publishes the notice.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use super::state::{LogoutReason, SessionEvent, SessionState};
use crate::credentials::{Credential, CredentialStore};
use crate::push::PushChannel;

const EVENT_CAPACITY: usize = 32;

/// Credentials, session state, event bus, and the push channel.
#[derive(Debug)]
pub struct SessionContext {
    credentials: Arc<CredentialStore>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    push: PushChannel,
}

impl SessionContext {
    /// Creates an anonymous context.
    pub fn new(credentials: Arc<CredentialStore>, push: PushChannel) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            credentials,
            state,
            events,
            push,
        }
    }

    /// The credential store.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Receiver for session events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The push channel bound to this session.
    pub fn push(&self) -> &PushChannel {
        &self.push
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            log::debug!("[Session] {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Move `from` to `to`. Returns `false` (and changes nothing) if the
    /// session is not in `from`.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            log::debug!("[Session] {} -> {}", state, to);
            *state = to;
            true
        })
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn begin_renewal(&self) {
        self.transition(SessionState::Authenticated, SessionState::Renewing);
    }

    /// Record a renewed credential and reopen the push channel with it if the
    /// channel has closed.
    pub(crate) fn finish_renewal(&self, credential: &Credential) {
        self.transition(SessionState::Renewing, SessionState::Authenticated);
        if self.state() == SessionState::Authenticated && !self.push.is_open() {
            log::info!("[Session] Reopening push channel with renewed credential");
            self.push.open(credential);
        }
    }

    /// End the session without the user asking. Returns `true` for the one
    /// caller that actually ended it; concurrent and repeated calls return
    /// `false` and publish nothing.
    pub fn force_logout(&self, reason: LogoutReason) -> bool {
        if !self.claim_teardown() {
            log::debug!("[Session] Forced logout ({}) ignored, no live session", reason);
            return false;
        }
        log::warn!("[Session] Forced logout: {}", reason);
        self.teardown();
        self.emit(SessionEvent::ForcedLogout { reason });
        true
    }

    /// User-initiated sign out. Always clears local credentials; returns
    /// `true` if a live session was ended.
    pub(crate) fn sign_out(&self) -> bool {
        let claimed = self.claim_teardown();
        self.teardown();
        if claimed {
            log::info!("[Session] Logged out");
            self.emit(SessionEvent::LoggedOut);
        }
        claimed
    }

    /// Atomically move a live session into `Terminating`.
    fn claim_teardown(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            SessionState::Anonymous | SessionState::Terminating => false,
            _ => {
                log::debug!("[Session] {} -> {}", state, SessionState::Terminating);
                *state = SessionState::Terminating;
                true
            }
        })
    }

    fn teardown(&self) {
        if let Err(e) = self.credentials.clear() {
            log::warn!("[Session] Failed to clear stored credentials: {}", e);
        }
        self.push.close();
        self.set_state(SessionState::Anonymous);
    }
}
