//! Courier - session client with single-flight credential renewal and a
//! push-reconciled notification feed.
//!
//! # Modules
//!
//! - [`credentials`] - credential store and its persistence backends
//! - [`client`] - authorized request client (renew on 401, retry once)
//! - [`renewal`] - single-flight renewal coordinator
//! - [`session`] - login, logout, bootstrap, forced logout
//! - [`push`] - authenticated WebSocket push channel
//! - [`notifications`] - merged notification feed
//! - [`app`] - the assembled client
//! - [`config`], [`env`], [`constants`] - settings

pub mod app;
pub mod client;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod env;
pub mod error;
pub mod notifications;
pub mod push;
pub mod renewal;
pub mod session;

pub use app::App;
pub use client::{ApiRequest, ApiResponse, HttpTransport, RequestClient, Transport};
pub use config::Config;
pub use credentials::{Credential, CredentialStore, Profile};
pub use error::{Error, RenewalFailure, Result};
pub use notifications::{NotificationRecord, NotificationStore};
pub use push::{PushChannel, PushConfig, PushEvent, PushListener, PushStatus};
pub use renewal::RenewalCoordinator;
pub use session::{AccountPolicy, LogoutReason, SessionEvent, SessionLifecycle, SessionState};

#[cfg(test)]
pub(crate) mod test_support;
