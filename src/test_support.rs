//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{ApiRequest, ApiResponse, RequestClient, Transport};
use crate::credentials::{
    Credential, CredentialStore, MemoryBackend, Profile, ACCESS_CREDENTIAL_KEY, PROFILE_KEY,
    REFRESH_CREDENTIAL_KEY,
};
use crate::error::Result;
use crate::push::{PushChannel, PushConfig, PushEvent, PushListener};
use crate::renewal::RenewalCoordinator;
use crate::session::{AccountPolicy, SessionContext, SessionLifecycle, SessionState};

type Responder = dyn Fn(&ApiRequest, Option<&Credential>) -> Result<ApiResponse> + Send + Sync;

/// In-memory backend answering from a closure and recording every call.
pub(crate) struct ScriptedTransport {
    respond: Box<Responder>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("delays", &self.delays)
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub(crate) fn new<F>(respond: F) -> Self
    where
        F: Fn(&ApiRequest, Option<&Credential>) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold responses for `path` for `delay`.
    pub(crate) fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }

    pub(crate) fn credentials_sent_to(&self, path: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: Option<&Credential>,
    ) -> Result<ApiResponse> {
        let route = request.route().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((route.clone(), credential.map(|c| c.expose().to_string())));
        if let Some(delay) = self.delays.get(&route) {
            tokio::time::sleep(*delay).await;
        }
        (self.respond)(request, credential)
    }
}

#[derive(Debug)]
struct DiscardListener;

impl PushListener for DiscardListener {
    fn on_message(&self, _event: PushEvent) {}
}

/// Push channel pointing at a closed port that gives up after one failure.
pub(crate) fn idle_push_channel() -> PushChannel {
    PushChannel::new(
        PushConfig {
            url: "ws://127.0.0.1:1/push".into(),
            connect_timeout: Duration::from_millis(200),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            max_reconnect_attempts: 0,
        },
        Arc::new(DiscardListener),
    )
}

fn seeded_store() -> CredentialStore {
    let profile = serde_json::to_string(&Profile::new("7").with_role("member")).unwrap();
    CredentialStore::load(MemoryBackend::with_entries([
        (ACCESS_CREDENTIAL_KEY, "a1".to_string()),
        (REFRESH_CREDENTIAL_KEY, "r1".to_string()),
        (PROFILE_KEY, profile),
    ]))
    .unwrap()
}

/// Context holding `a1`/`r1` in the `Authenticated` state.
pub(crate) fn authenticated_context() -> Arc<SessionContext> {
    let context = Arc::new(SessionContext::new(Arc::new(seeded_store()), idle_push_channel()));
    context.set_state(SessionState::Authenticated);
    context
}

/// Fully wired session over a scripted transport.
pub(crate) struct Harness {
    pub(crate) client: RequestClient,
    pub(crate) transport: Arc<ScriptedTransport>,
    pub(crate) credentials: Arc<CredentialStore>,
    pub(crate) context: Arc<SessionContext>,
    pub(crate) renewal: Arc<RenewalCoordinator>,
    pub(crate) lifecycle: SessionLifecycle,
}

fn harness(transport: ScriptedTransport, context: Arc<SessionContext>) -> Harness {
    let transport = Arc::new(transport);
    let credentials = Arc::clone(context.credentials());
    let renewal = Arc::new(RenewalCoordinator::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&context),
        Duration::from_secs(15),
    ));
    let client = RequestClient::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&credentials),
        Arc::clone(&renewal),
    );
    let lifecycle =
        SessionLifecycle::new(client.clone(), Arc::clone(&context), AccountPolicy::allow_all());
    Harness {
        client,
        transport,
        credentials,
        context,
        renewal,
        lifecycle,
    }
}

/// Signed-in session holding access `a1` and refresh `r1`.
pub(crate) fn authenticated_harness(transport: ScriptedTransport) -> Harness {
    harness(transport, authenticated_context())
}

/// Empty anonymous session.
pub(crate) fn anonymous_harness(transport: ScriptedTransport) -> Harness {
    let context = Arc::new(SessionContext::new(
        Arc::new(CredentialStore::in_memory()),
        idle_push_channel(),
    ));
    harness(transport, context)
}
