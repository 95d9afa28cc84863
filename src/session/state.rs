//! Session state and the events published on session changes.

use std::fmt;

use crate::credentials::Profile;
use crate::error::RenewalFailure;

/// Where the session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No session. No credential is held.
    #[default]
    Anonymous,
    /// A session is being established (stored credential validation or a
    /// login awaiting its account checks).
    Bootstrapping,
    /// Credential validated; calls are authorized and the push channel is open.
    Authenticated,
    /// A credential renewal is in flight.
    Renewing,
    /// The session is being torn down.
    Terminating,
}

impl SessionState {
    /// Returns `true` while the held credential belongs to a validated session.
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated | Self::Renewing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Renewing => write!(f, "renewing"),
            Self::Terminating => write!(f, "terminating"),
        }
    }
}

/// Why the session was ended without the user asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutReason {
    /// The credential could not be renewed.
    RenewalFailed(RenewalFailure),
    /// The account class may not hold a session.
    AccountNotPermitted {
        /// Role reported by the profile, if any.
        role: Option<String>,
    },
}

impl LogoutReason {
    /// Text shown to the user once when the session ends.
    pub fn notice(&self) -> String {
        match self {
            Self::RenewalFailed(_) => "Your session has expired. Please sign in again.".to_string(),
            Self::AccountNotPermitted { role: Some(role) } => {
                format!("Accounts with the '{role}' role cannot sign in here.")
            }
            Self::AccountNotPermitted { role: None } => {
                "This account cannot sign in here.".to_string()
            }
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenewalFailed(failure) => write!(f, "renewal failed ({failure})"),
            Self::AccountNotPermitted { role } => write!(
                f,
                "account not permitted (role: {})",
                role.as_deref().unwrap_or("none")
            ),
        }
    }
}

/// Session change published to subscribers (route guards, the CLI).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was established by login or bootstrap.
    SignedIn {
        /// Profile of the signed-in account.
        profile: Profile,
    },
    /// The user logged out.
    LoggedOut,
    /// The session was ended by the client. Emitted once per session.
    ForcedLogout {
        /// Why the session ended.
        reason: LogoutReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_states() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::Renewing.is_authenticated());
        assert!(!SessionState::Bootstrapping.is_authenticated());
        assert!(!SessionState::Terminating.is_authenticated());
        assert!(!SessionState::Anonymous.is_authenticated());
    }

    #[test]
    fn test_notice_names_role() {
        let reason = LogoutReason::AccountNotPermitted {
            role: Some("kiosk".into()),
        };
        assert!(reason.notice().contains("kiosk"));
        assert_eq!(
            LogoutReason::RenewalFailed(RenewalFailure::Rejected).to_string(),
            "renewal failed (refresh credential rejected)"
        );
    }
}
