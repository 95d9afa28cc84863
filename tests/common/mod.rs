//! Shared helpers for integration tests: config pointing at a wiremock
//! backend, seeded credential stores, and a scriptable push server.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier::credentials::{
    CredentialStore, MemoryBackend, ACCESS_CREDENTIAL_KEY, PROFILE_KEY, REFRESH_CREDENTIAL_KEY,
};
use courier::Config;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{http, Message};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Push URL nothing listens on.
pub const NO_PUSH: &str = "ws://127.0.0.1:1/push";

/// Config for a wiremock backend and the given push endpoint.
pub fn config_for(server: &MockServer, push_url: &str) -> Config {
    Config {
        server_url: server.uri(),
        push_url: Some(push_url.to_string()),
        request_timeout_secs: 5,
        renewal_timeout_secs: 5,
        push_max_reconnect_attempts: 0,
        disallowed_roles: Vec::new(),
    }
}

/// Store holding access `a1`, refresh `r1`, and a member profile.
pub fn seeded_store() -> CredentialStore {
    CredentialStore::load(MemoryBackend::with_entries([
        (ACCESS_CREDENTIAL_KEY, "a1".to_string()),
        (REFRESH_CREDENTIAL_KEY, "r1".to_string()),
        (PROFILE_KEY, profile_json().to_string()),
    ]))
    .unwrap()
}

pub fn profile_json() -> serde_json::Value {
    json!({"id": 7, "name": "Ada", "email": "ada@example.com", "role": "member"})
}

/// `GET /auth/profile` answers 200 for `Bearer token`.
pub async fn mount_profile(server: &MockServer, token: &str) {
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .mount(server)
        .await;
}

/// `GET /notifications/my` answers with `records`.
pub async fn mount_feed(server: &MockServer, records: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/notifications/my"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .mount(server)
        .await;
}

/// Number of requests the mock server saw for `route`.
pub async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

/// Poll `condition` every 10ms until it holds, panicking after `timeout`.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// What the push server does with one connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Fail the handshake with this HTTP status.
    Reject(u16),
    /// Accept, send `frames`, then either hold the connection open until the
    /// client leaves or close it with `close_code`.
    Serve {
        frames: Vec<String>,
        close_code: Option<u16>,
    },
}

impl Behavior {
    pub fn hold(frames: Vec<String>) -> Self {
        Self::Serve {
            frames,
            close_code: None,
        }
    }
}

/// Frame carrying one notification.
pub fn notification_frame(id: i64, is_read: bool) -> String {
    json!({
        "type": "notification",
        "payload": {"id": id, "payload": {"title": format!("n{id}")}, "isRead": is_read}
    })
    .to_string()
}

/// Local WebSocket server scripted per connection.
#[derive(Debug)]
pub struct PushServer {
    pub url: String,
    attempts: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    task: JoinHandle<()>,
}

impl PushServer {
    /// `behavior(n, authorization)` decides how the n-th handshake (from 0)
    /// is treated.
    pub async fn start<F>(behavior: F) -> Self
    where
        F: Fn(usize, Option<&str>) -> Behavior + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/push", listener.local_addr().unwrap());
        let attempts = Arc::new(AtomicUsize::new(0));
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(behavior);

        let task = tokio::spawn({
            let attempts = Arc::clone(&attempts);
            let auth_headers = Arc::clone(&auth_headers);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = attempts.fetch_add(1, Ordering::SeqCst);
                    let behavior = Arc::clone(&behavior);
                    let auth_headers = Arc::clone(&auth_headers);
                    tokio::spawn(async move {
                        let mut plan = None;
                        let accepted = tokio_tungstenite::accept_hdr_async(
                            stream,
                            |request: &Request, response: Response| {
                                let auth = request
                                    .headers()
                                    .get("authorization")
                                    .and_then(|v| v.to_str().ok())
                                    .map(String::from);
                                auth_headers.lock().unwrap().push(auth.clone());
                                match behavior(index, auth.as_deref()) {
                                    Behavior::Reject(status) => Err(http::Response::builder()
                                        .status(status)
                                        .body(None::<String>)
                                        .unwrap()),
                                    serve => {
                                        plan = Some(serve);
                                        Ok(response)
                                    }
                                }
                            },
                        )
                        .await;

                        let (Ok(mut ws), Some(Behavior::Serve { frames, close_code })) =
                            (accepted, plan)
                        else {
                            return;
                        };
                        for frame in frames {
                            if ws.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        match close_code {
                            Some(code) => {
                                let _ = ws
                                    .close(Some(CloseFrame {
                                        code: code.into(),
                                        reason: "".into(),
                                    }))
                                    .await;
                            }
                            None => while let Some(Ok(_)) = ws.next().await {},
                        }
                    });
                }
            }
        });

        Self {
            url,
            attempts,
            auth_headers,
            task,
        }
    }

    /// Handshakes attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `Authorization` header of each handshake, in order.
    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
