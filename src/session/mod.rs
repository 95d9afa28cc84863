//! The client session.
//!
//! ```text
//!   Anonymous ──bootstrap/login──► Bootstrapping ──ok──► Authenticated ◄──► Renewing
//!       ▲                              │                      │                │
//!       │                              │ fail                 │ logout         │ renewal failed
//!       └──────────────────────────────┴───── Terminating ◄───┴────────────────┘
//! ```
//!
//! [`SessionContext`] holds the shared pieces (credentials, state, events,
//! push channel) and performs teardown. [`SessionLifecycle`] drives login,
//! logout, and bootstrap on top of it.

mod context;
mod lifecycle;
mod policy;
mod state;

pub use context::SessionContext;
pub use lifecycle::SessionLifecycle;
pub use policy::AccountPolicy;
pub use state::{LogoutReason, SessionEvent, SessionState};
