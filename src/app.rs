//! Wires the session components together.
//!
//! ```text
//!   CredentialStore ◄── SessionContext (state, events, PushChannel) ◄── RenewalCoordinator
//!         ▲                   ▲                    │ events                 ▲
//!         │                   │                    ▼                        │
//!   RequestClient ────────────┴──► SessionLifecycle              RequestClient (401)
//!         │                                        pump task ──► NotificationStore
//!         └──► RestNotificationApi ───────────────────────────────────┘
//! ```
//!
//! The push channel delivers into an unbounded channel rather than straight
//! into the store, because the store's API needs the request client, which
//! needs the renewal coordinator, which needs the context that owns the push
//! channel. A pump task forwards events into the store and clears the feed
//! when the session ends.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::client::{HttpTransport, RequestClient, Transport};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::notifications::{NotificationStore, RestNotificationApi};
use crate::push::{PushChannel, PushConfig, PushEvent};
use crate::renewal::RenewalCoordinator;
use crate::session::{AccountPolicy, SessionContext, SessionEvent, SessionLifecycle, SessionState};

/// The assembled client.
#[derive(Debug)]
pub struct App {
    client: Arc<RequestClient>,
    lifecycle: SessionLifecycle,
    notifications: Arc<NotificationStore>,
    renewal: Arc<RenewalCoordinator>,
    push_events: Option<mpsc::UnboundedReceiver<PushEvent>>,
    pump: Option<JoinHandle<()>>,
}

impl App {
    /// Builds the client against the configured server over HTTP.
    pub fn new(config: &Config, credentials: CredentialStore) -> Result<Self> {
        let transport = HttpTransport::new(&config.server_url, config.request_timeout())?;
        Ok(Self::with_transport(
            config,
            credentials,
            Arc::new(transport),
        ))
    }

    /// Builds the client over an arbitrary transport.
    pub fn with_transport(
        config: &Config,
        credentials: CredentialStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::assemble(
            config.push_config(),
            config.account_policy(),
            config.renewal_timeout(),
            credentials,
            transport,
        )
    }

    fn assemble(
        push_config: PushConfig,
        policy: AccountPolicy,
        renewal_timeout: std::time::Duration,
        credentials: CredentialStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let (push_tx, push_rx) = mpsc::unbounded_channel::<PushEvent>();
        let push = PushChannel::new(push_config, Arc::new(push_tx));
        let context = Arc::new(SessionContext::new(Arc::clone(&credentials), push));

        let renewal = Arc::new(RenewalCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&context),
            renewal_timeout,
        ));
        let client = Arc::new(RequestClient::new(
            transport,
            credentials,
            Arc::clone(&renewal),
        ));
        let lifecycle = SessionLifecycle::new((*client).clone(), context, policy);
        let notifications = Arc::new(NotificationStore::new(Arc::new(
            RestNotificationApi::new(Arc::clone(&client)),
        )));

        Self {
            client,
            lifecycle,
            notifications,
            renewal,
            push_events: Some(push_rx),
            pump: None,
        }
    }

    /// Resume a stored session, load the feed if signed in, and start
    /// forwarding push events into the store. Call once.
    pub async fn start(&mut self) -> SessionState {
        self.spawn_pump();
        let state = self.lifecycle.bootstrap().await;
        if state.is_authenticated() {
            if let Err(e) = self.notifications.refresh().await {
                log::warn!("[App] Initial notification fetch failed: {}", e);
            }
        }
        state
    }

    fn spawn_pump(&mut self) {
        let Some(mut push_events) = self.push_events.take() else {
            return;
        };
        let mut session_events = self.lifecycle.subscribe();
        let notifications = Arc::clone(&self.notifications);

        self.pump = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = push_events.recv() => match event {
                        Some(PushEvent::Notification(record)) => {
                            notifications.ingest_push_event(record);
                        }
                        Some(PushEvent::Other { .. }) => {}
                        None => break,
                    },
                    event = session_events.recv() => match event {
                        Ok(SessionEvent::LoggedOut | SessionEvent::ForcedLogout { .. }) => {
                            log::debug!("[App] Session ended, clearing notifications");
                            notifications.clear();
                        }
                        Ok(SessionEvent::SignedIn { .. }) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("[App] Missed {} session event(s)", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("[App] Event pump stopped");
        }));
    }

    /// Sign in and load the feed.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<crate::credentials::Profile> {
        let profile = self.lifecycle.login(identifier, secret).await?;
        if let Err(e) = self.notifications.refresh().await {
            log::warn!("[App] Notification fetch after login failed: {}", e);
        }
        Ok(profile)
    }

    /// Sign out and drop the feed.
    pub async fn logout(&self) {
        self.lifecycle.logout().await;
        self.notifications.clear();
    }

    /// The authorized request client.
    pub fn client(&self) -> &Arc<RequestClient> {
        &self.client
    }

    /// The session lifecycle.
    pub fn session(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// The notification feed.
    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    /// The renewal coordinator.
    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        &self.renewal
    }

    /// The push channel.
    pub fn push(&self) -> &PushChannel {
        self.lifecycle.context().push()
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.push().close();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
