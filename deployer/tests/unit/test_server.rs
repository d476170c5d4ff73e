//! HTTP surface tests

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use nessus_deployer::authn::ldap::Authenticator;
use nessus_deployer::authn::session::{SessionKeys, SESSION_COOKIE};
use nessus_deployer::models::run::{HostResult, HostResults, HostStatus};
use nessus_deployer::secrets::cipher::SecretKey;
use nessus_deployer::secrets::store::SecretStore;
use nessus_deployer::server::serve::router;
use nessus_deployer::server::state::ServerState;
use tower::ServiceExt;

use crate::support::{job_context, leftover_inventories, stub_playbook};

/// Accepts exactly alice / correct-horse
struct StubAuthenticator;

#[async_trait]
impl Authenticator for StubAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        username == "alice" && password == "correct-horse"
    }
}

struct Harness {
    app: Router,
    state: Arc<ServerState>,
    marker: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness(playbook: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let script = stub_playbook(
        dir.path(),
        &format!("touch '{}'\n{}", marker.display(), playbook),
    );

    let key = SecretKey::from_encoded(&SecretKey::generate_encoded()).unwrap();
    let accounts = serde_json::from_value(serde_json::json!({
        "linux-prod": {
            "username": "svc_nessus",
            "password": key.encrypt("stored-pw").unwrap(),
            "activation_key": "ak-stored"
        }
    }))
    .unwrap();

    let state = Arc::new(ServerState::new(
        Arc::new(SecretStore::new(key, accounts)),
        job_context(dir.path(), &script).await,
        Arc::new(StubAuthenticator),
        Arc::new(SessionKeys::new(b"test-secret", Duration::from_secs(600))),
        false,
    ));

    Harness {
        app: router(state.clone()),
        state,
        marker,
        _dir: dir,
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

/// `name=value` of a cookie set by `response`
fn set_cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn login(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(post_form(
            "/login",
            "username=alice&password=correct-horse",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    set_cookie(&response, SESSION_COOKIE).unwrap()
}

fn no_launch(marker: &Path) -> bool {
    !marker.exists()
}

#[tokio::test]
async fn test_health_is_public() {
    let h = harness("").await;
    let response = h.app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("nessus-deployer"));
}

#[tokio::test]
async fn test_unauthenticated_requests_redirect_to_login() {
    let h = harness("echo 'h1 SUCCESS'\n").await;

    for uri in ["/", "/history", "/history/1", "/history/1/csv"] {
        let response = h.app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "GET {uri}");
        assert_eq!(location(&response), "/login");
    }

    let response = h
        .app
        .clone()
        .oneshot(post_form(
            "/",
            "username=u&password=p&activation_key=k&hosts=h1",
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    // A forged session is no session
    let response = h
        .app
        .clone()
        .oneshot(get("/", Some(&format!("{SESSION_COOKIE}=forged.token.value"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(no_launch(&h.marker));
    assert!(h.state.recorder.list_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_login_failure_flashes_message() {
    let h = harness("").await;

    let response = h
        .app
        .clone()
        .oneshot(post_form("/login", "username=alice&password=wrong", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
    let flash = set_cookie(&response, "deployer_flash").unwrap();
    assert_eq!(flash, "deployer_flash=login_failed");

    let response = h.app.oneshot(get("/login", Some(&flash))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Invalid username or password."));
}

#[tokio::test]
async fn test_login_then_index_lists_accounts() {
    let h = harness("").await;
    let session = login(&h.app).await;

    let response = h.app.clone().oneshot(get("/", Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Deploy Nessus Agent"));
    assert!(page.contains(r#"<option value="linux-prod">linux-prod</option>"#));
    assert!(!page.contains("stored-pw"));

    let response = h.app.oneshot(get("/logout", Some(&session))).await.unwrap();
    assert_eq!(location(&response), "/login");
    assert_eq!(
        set_cookie(&response, "deployer_flash").as_deref(),
        Some("deployer_flash=logged_out")
    );
}

#[tokio::test]
async fn test_missing_credentials_is_bad_request() {
    let h = harness("").await;
    let session = login(&h.app).await;

    let response = h
        .app
        .clone()
        .oneshot(post_form("/", "username=u&hosts=h1", Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_text(response).await,
        "Error: username, password, and activation key are required."
    );

    let response = h
        .app
        .oneshot(post_form(
            "/",
            "predefined_account=nope&hosts=h1",
            Some(&session),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(no_launch(&h.marker));
}

#[tokio::test]
async fn test_deploy_streams_events_and_records() {
    let h = harness("echo 'h1 ... SUCCESS'\necho 'h2 ... FAILED'\nexit 1\n").await;
    let session = login(&h.app).await;

    let response = h
        .app
        .clone()
        .oneshot(post_form(
            "/",
            "predefined_account=linux-prod&hosts=h1%0D%0Ah2%0D%0A&remove_rapid7=true",
            Some(&session),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let body = body_text(response).await;
    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();
    assert_eq!(data, vec!["h1 ... SUCCESS", "h2 ... FAILED", "PLAYBOOK_EXIT=1"]);

    h.state.jobs.tracker.close();
    h.state.jobs.tracker.wait().await;

    let runs = h.state.recorder.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].initiator, "alice");
    assert_eq!(runs[0].host_results["h1"].status, HostStatus::Success);
    assert_eq!(runs[0].host_results["h2"].status, HostStatus::Failed);
    assert!(leftover_inventories(h.marker.parent().unwrap()).is_empty());

    let response = h
        .app
        .oneshot(get(&format!("/history/{}", runs[0].id), Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("h2 ... FAILED"));
}

#[tokio::test]
async fn test_history_csv_download() {
    let h = harness("").await;
    let session = login(&h.app).await;

    let mut results = HostResults::new();
    for (host, status) in [("h1", HostStatus::Success), ("h2", HostStatus::Failed)] {
        results.insert(
            host.to_string(),
            HostResult {
                removed_legacy_agent: true,
                installed_agent: status == HostStatus::Success,
                status,
                details: String::new(),
            },
        );
    }
    let record = h
        .state
        .recorder
        .record("alice", "log\n", &results, Some(1))
        .await
        .unwrap();

    let response = h
        .app
        .clone()
        .oneshot(get(&format!("/history/{}/csv", record.id), Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv; charset=utf-8"
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment"));

    let csv = body_text(response).await;
    assert_eq!(
        csv.lines().collect::<Vec<_>>(),
        vec![
            "Hostname,Legacy Agent Removed,Agent Installed,Status",
            "h1,Yes,Yes,success",
            "h2,Yes,No,failed",
        ]
    );

    let response = h
        .app
        .clone()
        .oneshot(get("/history/999/csv", Some(&session)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h.app.oneshot(get("/history", Some(&session))).await.unwrap();
    assert!(body_text(response).await.contains(&format!("/history/{}", record.id)));
}

#[test]
fn test_empty_store_has_no_accounts() {
    let key = SecretKey::from_encoded(&SecretKey::generate_encoded()).unwrap();
    let store = SecretStore::new(key, BTreeMap::new());
    assert!(store.account_names().is_empty());
}
