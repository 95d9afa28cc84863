//! Application-wide constants for courier.
//!
//! Centralizes timeouts, backoff bounds, and backend endpoint paths so the
//! request, renewal, and push layers agree on them.
//!
//! # Categories
//!
//! - **Timeouts**: Network and renewal timeouts
//! - **Push**: Reconnection backoff bounds
//! - **Endpoints**: Backend REST paths

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for API calls.
///
/// Applies to every individual HTTP request, including the refresh call.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a whole renewal attempt.
///
/// A renewal that has not settled within this window is treated as a
/// terminal renewal failure.
pub const RENEWAL_TIMEOUT: Duration = Duration::from_secs(15);

/// WebSocket handshake timeout for the push channel.
pub const PUSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Push reconnection
// ============================================================================

/// Initial reconnection delay after the push channel drops.
pub const PUSH_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Maximum reconnection delay for the push channel.
pub const PUSH_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Consecutive failed connection attempts before the push channel gives up.
///
/// The counter resets after every successful handshake.
pub const PUSH_MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// WebSocket close code the backend uses for an expired or revoked credential.
pub const PUSH_CLOSE_UNAUTHORIZED: u16 = 4001;

/// RFC 6455 policy-violation close code, also treated as a credential rejection.
pub const PUSH_CLOSE_POLICY_VIOLATION: u16 = 1008;

// ============================================================================
// Endpoints
// ============================================================================

/// Login endpoint (exempt from 401 renewal).
pub const LOGIN_PATH: &str = "/auth/login";

/// Profile endpoint used to validate a stored credential.
pub const PROFILE_PATH: &str = "/auth/profile";

/// Credential renewal endpoint (exempt from 401 renewal).
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Logout endpoint (exempt from 401 renewal).
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Snapshot of the current user's notifications.
pub const NOTIFICATIONS_PATH: &str = "/notifications/my";

/// Bulk acknowledgement endpoint.
pub const NOTIFICATIONS_MARK_ALL_READ_PATH: &str = "/notifications/mark-all-read";

/// Default push endpoint path, appended to the server URL.
pub const PUSH_PATH: &str = "/push";

/// Endpoints on which a 401 is final and never triggers renewal.
pub const RENEWAL_EXEMPT_PATHS: [&str; 3] = [LOGIN_PATH, REFRESH_PATH, LOGOUT_PATH];

/// Path acknowledging a single notification.
pub fn notification_read_path(id: i64) -> String {
    format!("/notifications/{id}/read")
}
