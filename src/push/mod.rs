//! Authenticated push channel.
//!
//! One background task per open channel owns the WebSocket. The credential is
//! sent once, as a bearer header on the handshake. The channel never renews
//! credentials: if the server rejects the credential the task ends, and the
//! session reopens the channel after its next successful renewal.
//!
//! ```text
//!   open(cred) ──► spawn task ──► connect ──ok──► Open ──frames──► PushListener
//!                                  │  ▲                 │
//!                 401/403 ◄────────┘  │ backoff         │ drop / error
//!                 unauthorized frame  │ 1s → 30s        ▼
//!                 close 4001/1008     └──────── Reconnecting { attempt }
//!                     │                         (gives up after N failures)
//!                     ▼
//!                 Rejected (task ends, no reconnect)
//! ```

mod messages;
mod ws;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use messages::PushEvent;
pub use ws::http_to_ws_scheme;

use crate::constants::{
    PUSH_CLOSE_POLICY_VIOLATION, PUSH_CLOSE_UNAUTHORIZED, PUSH_CONNECT_TIMEOUT,
    PUSH_INITIAL_BACKOFF, PUSH_MAX_BACKOFF, PUSH_MAX_RECONNECT_ATTEMPTS,
};
use crate::credentials::Credential;
use messages::Frame;
use ws::{ConnectError, WsMessage, WsReader, WsWriter};

/// Receives events from the push channel. Called on the channel's task, so
/// implementations must not block.
pub trait PushListener: Send + Sync + fmt::Debug {
    /// Handle one event.
    fn on_message(&self, event: PushEvent);
}

impl PushListener for mpsc::UnboundedSender<PushEvent> {
    fn on_message(&self, event: PushEvent) {
        if self.send(event).is_err() {
            log::debug!("[Push] Listener dropped, discarding event");
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Bound on each handshake.
    pub connect_timeout: Duration,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Reconnect delay ceiling. A connection that stayed up this long resets
    /// the backoff.
    pub max_backoff: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
}

impl PushConfig {
    /// Default timings for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: PUSH_CONNECT_TIMEOUT,
            initial_backoff: PUSH_INITIAL_BACKOFF,
            max_backoff: PUSH_MAX_BACKOFF,
            max_reconnect_attempts: PUSH_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Observable connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushStatus {
    /// Not open, or gave up reconnecting.
    #[default]
    Closed,
    /// First handshake in progress.
    Connecting,
    /// Connected and receiving.
    Open,
    /// Waiting to retry after a failure.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
    },
    /// The server refused the credential. Stays closed until reopened.
    Rejected,
}

#[derive(Debug)]
struct ActiveConnection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// At most one live push connection, opened and closed by the session.
#[derive(Debug)]
pub struct PushChannel {
    config: PushConfig,
    listener: Arc<dyn PushListener>,
    active: Mutex<Option<ActiveConnection>>,
    status: Arc<watch::Sender<PushStatus>>,
}

impl PushChannel {
    /// Creates a closed channel delivering to `listener`.
    pub fn new(config: PushConfig, listener: Arc<dyn PushListener>) -> Self {
        let (status, _) = watch::channel(PushStatus::Closed);
        Self {
            config,
            listener,
            active: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// Start the connection task with `credential`. No-op if one is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, credential: &Credential) {
        let mut active = self.active.lock().expect("PushChannel mutex poisoned");
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            log::debug!("[Push] Already open, ignoring open()");
            return;
        }

        log::info!("[Push] Opening channel to {}", self.config.url);
        let cancel = CancellationToken::new();
        let worker = PushWorker {
            config: self.config.clone(),
            bearer: credential.bearer(),
            listener: Arc::clone(&self.listener),
            status: Arc::clone(&self.status),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());
        *active = Some(ActiveConnection { cancel, task });
    }

    /// Stop the connection task. Idempotent.
    pub fn close(&self) {
        let active = self.active.lock().expect("PushChannel mutex poisoned").take();
        if let Some(active) = active {
            log::info!("[Push] Closing channel");
            active.cancel.cancel();
        }
        self.status.send_replace(PushStatus::Closed);
    }

    /// Returns `true` while a connection task is running (connected or
    /// retrying).
    pub fn is_open(&self) -> bool {
        self.active
            .lock()
            .expect("PushChannel mutex poisoned")
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    /// Current status.
    pub fn status(&self) -> PushStatus {
        *self.status.borrow()
    }

    /// Receiver observing status changes.
    pub fn watch_status(&self) -> watch::Receiver<PushStatus> {
        self.status.subscribe()
    }

    /// The endpoint this channel connects to.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(active) = active.take() {
                active.cancel.cancel();
            }
        }
    }
}

/// How one connection ended.
enum ConnectionExit {
    Cancelled,
    Rejected,
    Disconnected,
}

struct PushWorker {
    config: PushConfig,
    bearer: String,
    listener: Arc<dyn PushListener>,
    status: Arc<watch::Sender<PushStatus>>,
    cancel: CancellationToken,
}

impl PushWorker {
    async fn run(self) {
        // Whatever way the task ends, a non-rejected status falls back to Closed.
        let guarded = (Arc::clone(&self.status), self.cancel.clone());
        let _closed = scopeguard::guard(guarded, |(status, cancel)| {
            if !cancel.is_cancelled() {
                status.send_if_modified(|s| {
                    if matches!(s, PushStatus::Rejected | PushStatus::Closed) {
                        return false;
                    }
                    *s = PushStatus::Closed;
                    true
                });
            }
        });

        let headers = [("Authorization", self.bearer.as_str())];
        let mut backoff = self.config.initial_backoff;
        let mut failures: u32 = 0;

        loop {
            if failures == 0 {
                self.set_status(PushStatus::Connecting);
            }

            let handshake = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    ws::connect(&self.config.url, &headers),
                ) => result,
            };

            match handshake {
                Ok(Ok((mut writer, mut reader))) => {
                    log::info!("[Push] Connected");
                    self.set_status(PushStatus::Open);
                    let connected_at = Instant::now();

                    match self.pump(&mut writer, &mut reader).await {
                        ConnectionExit::Cancelled => {
                            let _ = writer.close().await;
                            return;
                        }
                        ConnectionExit::Rejected => {
                            log::warn!("[Push] Credential rejected by server, not reconnecting");
                            self.set_status(PushStatus::Rejected);
                            return;
                        }
                        ConnectionExit::Disconnected => {
                            if connected_at.elapsed() >= self.config.max_backoff {
                                backoff = self.config.initial_backoff;
                                failures = 0;
                            }
                        }
                    }
                }
                Ok(Err(ConnectError::Rejected(status))) => {
                    log::warn!("[Push] Handshake rejected ({}), not reconnecting", status);
                    self.set_status(PushStatus::Rejected);
                    return;
                }
                Ok(Err(ConnectError::Failed(e))) => {
                    log::warn!("[Push] Connection failed: {:#}", e);
                }
                Err(_) => {
                    log::warn!(
                        "[Push] Handshake timed out after {:?}",
                        self.config.connect_timeout
                    );
                }
            }

            failures += 1;
            if failures > self.config.max_reconnect_attempts {
                log::warn!("[Push] Giving up after {} failed attempt(s)", failures);
                return;
            }

            log::info!("[Push] Reconnecting in {:?} (attempt {})", backoff, failures);
            self.set_status(PushStatus::Reconnecting { attempt: failures });
            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    /// Deliver frames until the connection ends.
    async fn pump(&self, writer: &mut WsWriter, reader: &mut WsReader) -> ConnectionExit {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return ConnectionExit::Cancelled,
                message = reader.recv() => message,
            };

            match message {
                Some(Ok(WsMessage::Text(text))) => match messages::parse_frame(&text) {
                    Ok(Frame::Event(event)) => {
                        if let PushEvent::Other { kind, .. } = &event {
                            log::debug!("[Push] Ignoring '{}' frame", kind);
                        }
                        self.listener.on_message(event);
                    }
                    Ok(Frame::Unauthorized) => return ConnectionExit::Rejected,
                    Err(e) => log::warn!("[Push] Unreadable frame: {}", e),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(WsMessage::Close { code, reason })) => {
                    log::info!("[Push] Server closed connection ({} {})", code, reason);
                    if code == PUSH_CLOSE_UNAUTHORIZED || code == PUSH_CLOSE_POLICY_VIOLATION {
                        return ConnectionExit::Rejected;
                    }
                    return ConnectionExit::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("[Push] {}", e);
                    return ConnectionExit::Disconnected;
                }
                None => {
                    log::info!("[Push] Stream ended");
                    return ConnectionExit::Disconnected;
                }
            }
        }
    }

    fn set_status(&self, next: PushStatus) {
        if !self.cancel.is_cancelled() {
            self.status.send_replace(next);
        }
    }
}
