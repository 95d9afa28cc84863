//! Credential renewal against a mock backend: single flight, late 401s, and
//! failure fan-out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config_for, mount_profile, requests_to, seeded_store, NO_PUSH};
use courier::{
    App, Credential, Error, LogoutReason, RenewalFailure, SessionEvent, SessionState,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Backend where `a1` has expired and `r1` renews into `a2`.
async fn expired_backend(refresh_delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    mount_profile(&server, "a1").await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refreshCredential": "r1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"credential": "a2", "refreshCredential": "r2"}))
                .set_delay(refresh_delay),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/things/"))
        .and(header("Authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    server
}

async fn started_app(server: &MockServer) -> App {
    let mut app = App::new(&config_for(server, NO_PUSH), seeded_store()).unwrap();
    assert_eq!(app.start().await, SessionState::Authenticated);
    app
}

#[tokio::test]
async fn test_concurrent_401s_issue_exactly_one_renewal() {
    let server = expired_backend(Duration::from_millis(100)).await;
    Mock::given(method("GET"))
        .and(path_regex("^/things/"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let app = started_app(&server).await;

    let calls: Vec<_> = (0..10)
        .map(|i| {
            let client = Arc::clone(app.client());
            tokio::spawn(async move { client.get_json::<Value>(&format!("/things/{i}")).await })
        })
        .collect();
    for call in calls {
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
    }

    assert_eq!(requests_to(&server, "/auth/refresh").await, 1);
    assert_eq!(
        app.client().credentials().access_credential(),
        Some(Credential::new("a2"))
    );
    assert_eq!(
        app.client().credentials().refresh_credential(),
        Some(Credential::new("r2"))
    );
    assert_eq!(app.session().state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_staggered_401s_share_one_renewal() {
    // A fails at once and starts the renewal. B's 401 lands while the renewal
    // is in flight. C's 401 lands after it finished, still carrying a1.
    let server = expired_backend(Duration::from_millis(200)).await;
    for (route, delay) in [("/things/a", 0), ("/things/b", 60), ("/things/c", 400)] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(delay)))
            .mount(&server)
            .await;
    }
    let app = started_app(&server).await;

    let spawn = |route: &'static str| {
        let client = Arc::clone(app.client());
        tokio::spawn(async move { client.get_json::<Value>(route).await })
    };
    let a = spawn("/things/a");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = spawn("/things/b");
    let c = spawn("/things/c");

    for call in [a, b, c] {
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
    }
    assert_eq!(requests_to(&server, "/auth/refresh").await, 1);
}

#[tokio::test]
async fn test_failed_renewal_rejects_every_caller_and_forces_one_logout() {
    let server = MockServer::start().await;
    mount_profile(&server, "a1").await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": "refresh expired"}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/things/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let app = started_app(&server).await;
    let mut events = app.session().subscribe();

    let calls: Vec<_> = (0..6)
        .map(|i| {
            let client = Arc::clone(app.client());
            tokio::spawn(async move { client.get_json::<Value>(&format!("/things/{i}")).await })
        })
        .collect();
    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(
            matches!(err, Error::Renewal(RenewalFailure::Rejected)),
            "unexpected error: {err:?}"
        );
    }

    assert_eq!(app.session().state(), SessionState::Anonymous);
    assert!(!app.client().credentials().has_credential());
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ForcedLogout {
            reason: LogoutReason::RenewalFailed(RenewalFailure::Rejected)
        }
    );
    assert!(events.try_recv().is_err());
    assert_eq!(requests_to(&server, "/auth/refresh").await, 1);
}

#[tokio::test]
async fn test_401_after_renewal_is_not_retried_again() {
    let server = expired_backend(Duration::ZERO).await;
    Mock::given(method("GET"))
        .and(path("/forbidden"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let app = started_app(&server).await;

    let err = app.client().get_json::<Value>("/forbidden").await.unwrap_err();
    assert!(matches!(err, Error::Authorization));
    assert_eq!(requests_to(&server, "/forbidden").await, 2);
    // The renewal itself succeeded, so the session survives.
    assert_eq!(app.session().state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_server_errors_pass_through_without_renewal() {
    let server = MockServer::start().await;
    mount_profile(&server, "a1").await;
    Mock::given(method("GET"))
        .and(path("/things/x"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "invalid"})))
        .mount(&server)
        .await;
    let app = started_app(&server).await;

    let err = app.client().get_json::<Value>("/things/x").await.unwrap_err();
    match err {
        Error::ServerRejection { status, envelope } => {
            assert_eq!(status, 422);
            assert_eq!(envelope, json!({"error": "invalid"}));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(requests_to(&server, "/auth/refresh").await, 0);
}
