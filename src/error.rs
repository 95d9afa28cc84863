//! Error taxonomy for the session client.
//!
//! Only a single 401 retry is handled transparently; every other failure in
//! this enum surfaces to the caller. Errors are `Clone` because one renewal
//! outcome is fanned out to every queued caller.

/// Result alias used across the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the request, session, and notification layers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No response was received (connect failure, timeout, broken body).
    #[error("network error: {0}")]
    Network(String),

    /// A 401 survived renewal, or hit an endpoint that never renews.
    #[error("authorization rejected by server")]
    Authorization,

    /// Any other non-success status, carrying the server's error envelope.
    #[error("server rejected request with status {status}: {envelope}")]
    ServerRejection {
        /// HTTP status code.
        status: u16,
        /// Parsed JSON error body, or the raw body as a JSON string.
        envelope: serde_json::Value,
    },

    /// Credential renewal failed. Always terminal for the session.
    #[error("credential renewal failed: {0}")]
    Renewal(#[from] RenewalFailure),

    /// A response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The credential backend could not be read or written.
    #[error("credential storage error: {0}")]
    Storage(String),

    /// The account class is not allowed to hold a session.
    #[error("account is not permitted to sign in")]
    AccountNotPermitted,

    /// The notification id is not in the local feed.
    #[error("unknown notification {0}")]
    UnknownNotification(i64),
}

impl Error {
    /// Returns `true` for errors that end the session (renewal failures and
    /// disallowed accounts).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Renewal(_) | Self::AccountNotPermitted)
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authorization => Some(401),
            Self::ServerRejection { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a renewal attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenewalFailure {
    /// No refresh credential is stored, so renewal cannot be attempted.
    #[error("no refresh credential stored")]
    NoRefreshCredential,
    /// The refresh endpoint rejected the refresh credential (401/403).
    #[error("refresh credential rejected")]
    Rejected,
    /// The refresh call never produced a response.
    #[error("network error: {0}")]
    Network(String),
    /// The attempt exceeded the renewal timeout.
    #[error("timed out")]
    TimedOut,
    /// The refresh endpoint answered with another non-success status.
    #[error("server returned {status}")]
    Server {
        /// HTTP status code.
        status: u16,
    },
    /// The refresh response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The renewal task ended without settling its waiters.
    #[error("renewal abandoned")]
    Abandoned,
    /// The session was signed out or replaced while the refresh call was in
    /// flight; its result was discarded.
    #[error("session ended during renewal")]
    SessionEnded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::Authorization.status(), Some(401));
        let rejection = Error::ServerRejection {
            status: 422,
            envelope: serde_json::json!({"error": "invalid"}),
        };
        assert_eq!(rejection.status(), Some(422));
        assert_eq!(Error::Network("down".into()).status(), None);
    }

    #[test]
    fn test_terminal_errors() {
        assert!(Error::Renewal(RenewalFailure::TimedOut).is_terminal());
        assert!(Error::AccountNotPermitted.is_terminal());
        assert!(!Error::Authorization.is_terminal());
    }

    #[test]
    fn test_renewal_failure_display() {
        let err = Error::from(RenewalFailure::Server { status: 503 });
        assert_eq!(err.to_string(), "credential renewal failed: server returned 503");
        assert_eq!(
            RenewalFailure::SessionEnded.to_string(),
            "session ended during renewal"
        );
    }
}
