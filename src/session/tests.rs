//! Tests for the session's dispatch, pacing, and status handling.
//!
//! Every test drives a real `reqwest` client against a scripted loopback
//! server so the retry and rate-limiting machinery is exercised end to end.

use std::time::Duration;

use camino::Utf8PathBuf;

use super::{AutomationSession, SessionError, SessionTuning};
use crate::api::{PackageKind, ProvisioningState};
use crate::config::AutomationConfig;
use crate::progress::Progress;
use crate::test_support::{ScriptedResponse, ScriptedServer};

const ACCOUNT_ID: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Automation/automationAccounts/acct-1";

fn config_for(server: &ScriptedServer) -> AutomationConfig {
    AutomationConfig {
        account_id: ACCOUNT_ID.to_owned(),
        management_url: server.base_url(),
        storage_link_url: format!("{}/sas", server.base_url()),
        api_version: String::from("2018-06-30"),
    }
}

fn fast_tuning() -> SessionTuning {
    SessionTuning {
        retries: 5,
        min_request_interval: Duration::ZERO,
        retry_backoff: Duration::from_millis(5),
        request_timeout: Duration::from_millis(250),
    }
}

async fn start_server(script: Vec<ScriptedResponse>) -> ScriptedServer {
    ScriptedServer::start(script)
        .await
        .unwrap_or_else(|err| panic!("failed to start scripted server: {err}"))
}

/// Connects against a server whose first scripted response must be the
/// 200 probe.
async fn connected_session(server: &ScriptedServer, tuning: SessionTuning) -> AutomationSession {
    AutomationSession::connect_with(config_for(server), "token-1", Progress::silent(), tuning)
        .await
        .unwrap_or_else(|err| panic!("session should connect: {err}"))
}

#[tokio::test]
async fn connect_maps_probe_status_to_error_class() {
    type Predicate = fn(&SessionError) -> bool;
    let cases: [(u16, Predicate); 3] = [
        (401, |err| matches!(err, SessionError::AccessDenied)),
        (400, |err| matches!(err, SessionError::InvalidAccountId { .. })),
        (404, |err| matches!(err, SessionError::AccountNotFound { .. })),
    ];

    for (status, predicate) in cases {
        let server = start_server(vec![ScriptedResponse::status(status)]).await;
        let result = AutomationSession::connect_with(
            config_for(&server),
            "token-1",
            Progress::silent(),
            fast_tuning(),
        )
        .await;

        let err = result.err().unwrap_or_else(|| panic!("status {status} should fail"));
        assert!(predicate(&err), "status {status} produced unexpected error: {err}");
        assert_eq!(
            server.requests().len(),
            1,
            "status {status} should issue no further calls"
        );
    }
}

#[tokio::test]
async fn connect_sends_bearer_authorization() {
    let server = start_server(vec![ScriptedResponse::status(200)]).await;
    let _session = connected_session(&server, fast_tuning()).await;

    let requests = server.requests();
    let probe = requests.first().unwrap_or_else(|| panic!("probe missing"));
    assert_eq!(probe.method, "GET");
    assert!(
        probe.path.ends_with("?api-version=2018-06-30"),
        "probe path: {}",
        probe.path
    );
    assert_eq!(probe.header("authorization"), Some("Bearer token-1"));
}

#[tokio::test]
async fn transient_status_is_retried_until_success() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(429),
        ScriptedResponse::status(200),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    session
        .delete_package("pkg")
        .await
        .unwrap_or_else(|err| panic!("delete should succeed after retry: {err}"));

    assert_eq!(server.requests().len(), 3, "probe plus two delete attempts");
}

#[tokio::test]
async fn exhausted_retries_surface_method_and_url() {
    let mut tuning = fast_tuning();
    tuning.retries = 3;
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(503),
        ScriptedResponse::status(503),
        ScriptedResponse::status(503),
    ])
    .await;
    let session = connected_session(&server, tuning).await;

    let result = session.delete_package("pkg").await;

    assert!(
        matches!(
            result,
            Err(SessionError::RetriesExhausted { ref method, ref url })
                if method == "DELETE" && url.contains("python3Packages/pkg")
        ),
        "unexpected result: {result:?}"
    );
    assert_eq!(server.requests().len(), 4, "probe plus three attempts");
}

#[tokio::test]
async fn non_transient_status_fails_on_first_attempt() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(403),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    let result = session.delete_package("pkg").await;

    assert!(
        matches!(
            result,
            Err(SessionError::UnexpectedStatus { status: 403, .. })
        ),
        "unexpected result: {result:?}"
    );
    assert_eq!(server.requests().len(), 2, "no retry for a plain 4xx");
}

#[tokio::test]
async fn read_timeout_is_transient() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::stalled(Duration::from_millis(400)),
        ScriptedResponse::status(200),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    session
        .delete_package("pkg")
        .await
        .unwrap_or_else(|err| panic!("delete should succeed after timeout retry: {err}"));

    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn consecutive_requests_are_paced() {
    let mut tuning = fast_tuning();
    tuning.min_request_interval = Duration::from_millis(120);
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(200),
        ScriptedResponse::status(200),
    ])
    .await;
    let session = connected_session(&server, tuning).await;

    session
        .delete_package("a")
        .await
        .unwrap_or_else(|err| panic!("delete a: {err}"));
    session
        .delete_package("b")
        .await
        .unwrap_or_else(|err| panic!("delete b: {err}"));

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for pair in requests.windows(2) {
        let (Some(earlier), Some(later)) = (pair.first(), pair.get(1)) else {
            panic!("window of two");
        };
        let gap = later.received_at.duration_since(earlier.received_at);
        assert!(
            gap >= Duration::from_millis(100),
            "requests arrived only {gap:?} apart"
        );
    }
}

#[tokio::test]
async fn package_status_decodes_envelope() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::ok_json(r#"{"properties":{"provisioningState":"Creating"}}"#),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    let maybe_status = session
        .package_status("pkg")
        .await
        .unwrap_or_else(|err| panic!("status query: {err}"));

    let status = maybe_status.unwrap_or_else(|| panic!("package should be present"));
    assert_eq!(status.state, ProvisioningState::Creating);
    assert!(status.error_message.is_none());
}

#[tokio::test]
async fn package_status_absent_on_404() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(404),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    let status = session
        .package_status("pkg")
        .await
        .unwrap_or_else(|err| panic!("status query: {err}"));

    assert!(status.is_none(), "404 must decode to an absent package");
}

#[tokio::test]
async fn delete_missing_package_is_an_error() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(404),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    let result = session.delete_package("ghost").await;

    assert!(
        matches!(result, Err(SessionError::PackageNotFound { ref name }) if name == "ghost"),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn upload_artifact_performs_two_phase_upload() {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let artifact = Utf8PathBuf::from_path_buf(dir.path().join("payload.zip"))
        .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
    std::fs::write(&artifact, b"zipbytes").unwrap_or_else(|err| panic!("write artifact: {err}"));

    let server = start_server(vec![ScriptedResponse::status(200)]).await;
    let blob_uri = format!("{}/blob-7?sig=abc", server.base_url());
    server.push_response(ScriptedResponse::ok_json(format!("\"{blob_uri}\"")));
    server.push_response(ScriptedResponse::status(201));

    let session = connected_session(&server, fast_tuning()).await;
    let returned_uri = session
        .upload_artifact(&artifact)
        .await
        .unwrap_or_else(|err| panic!("upload: {err}"));

    assert_eq!(returned_uri, blob_uri);

    let requests = server.requests();
    assert_eq!(requests.len(), 3);

    let link = requests.get(1).unwrap_or_else(|| panic!("link request missing"));
    assert_eq!(link.method, "GET");
    assert!(
        link.path.contains("assetType=Module"),
        "link path: {}",
        link.path
    );
    assert!(link.header("authorization").is_some());

    let blob = requests.get(2).unwrap_or_else(|| panic!("blob request missing"));
    assert_eq!(blob.method, "PUT");
    assert_eq!(blob.header("x-ms-blob-type"), Some("BlockBlob"));
    assert!(
        blob.header("authorization").is_none(),
        "blob upload must not carry the bearer token"
    );
    assert_eq!(blob.body, b"zipbytes");
}

#[tokio::test]
async fn import_package_sends_content_link_body() {
    let server = start_server(vec![
        ScriptedResponse::status(200),
        ScriptedResponse::status(200),
    ])
    .await;
    let session = connected_session(&server, fast_tuning()).await;

    session
        .import_package(PackageKind::Module, "mod-1", "https://blob.example/tmp/1")
        .await
        .unwrap_or_else(|err| panic!("import: {err}"));

    let requests = server.requests();
    let import = requests.get(1).unwrap_or_else(|| panic!("import request missing"));
    assert_eq!(import.method, "PUT");
    assert!(
        import.path.contains("/modules/mod-1?api-version="),
        "import path: {}",
        import.path
    );

    let body: serde_json::Value = serde_json::from_slice(&import.body)
        .unwrap_or_else(|err| panic!("import body is not JSON: {err}"));
    assert_eq!(
        body,
        serde_json::json!({
            "properties": {"contentLink": {"uri": "https://blob.example/tmp/1"}}
        })
    );
}
