//! Test support utilities shared across unit and integration tests.
//!
//! Two scripted doubles live here: [`ScriptedServer`], a minimal HTTP server
//! that answers with pre-seeded responses while recording every request it
//! receives, and [`RecordingApi`], an [`AutomationApi`] implementation with
//! a scripted status queue. Both exist so protocol behaviour can be asserted
//! deterministically without touching a real control plane.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::api::{ApiFuture, AutomationApi, PackageKind, PackageStatus, ProvisioningState};

/// One canned HTTP response served by [`ScriptedServer`].
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
    /// HTTP status code to answer with.
    pub status: u16,
    /// Response body (served as `application/json`).
    pub body: String,
    /// Pause before answering, to simulate a slow service.
    pub delay: Duration,
    /// When true the connection is closed without writing a response,
    /// which the client observes as a timeout or truncated read.
    pub drop_connection: bool,
}

impl ScriptedResponse {
    /// A response with the given status and an empty body.
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
            drop_connection: false,
        }
    }

    /// A 200 response carrying a JSON body.
    #[must_use]
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: Duration::ZERO,
            drop_connection: false,
        }
    }

    /// A connection that stalls for `delay` and then closes without
    /// answering.
    #[must_use]
    pub const fn stalled(delay: Duration) -> Self {
        Self {
            status: 0,
            body: String::new(),
            delay,
            drop_connection: true,
        }
    }
}

/// One request observed by [`ScriptedServer`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// HTTP method as sent by the client.
    pub method: String,
    /// Request target (path plus query string).
    pub path: String,
    /// Header name/value pairs with lowercased names.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: Vec<u8>,
    /// When the request line was received.
    pub received_at: Instant,
}

impl RecordedRequest {
    /// Returns the first header with the given (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == wanted)
            .map(|(_, value)| value.as_str())
    }
}

/// Minimal scripted HTTP server bound to a loopback port.
///
/// Responses are served in FIFO order, one connection per request; when the
/// script runs out the server answers 200 with an empty body. Every request
/// is recorded for later assertions.
#[derive(Debug)]
pub struct ScriptedServer {
    addr: std::net::SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    accept_loop: JoinHandle<()>,
}

impl ScriptedServer {
    /// Binds a listener on an ephemeral loopback port and starts serving the
    /// script.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the listener cannot be bound.
    pub async fn start(script: Vec<ScriptedResponse>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(VecDeque::from(script)));

        let loop_requests = Arc::clone(&requests);
        let loop_responses = Arc::clone(&responses);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let response = loop_responses
                    .lock()
                    .ok()
                    .and_then(|mut queue| queue.pop_front())
                    .unwrap_or_else(|| ScriptedResponse::status(200));
                serve_connection(stream, &loop_requests, response).await;
            }
        });

        Ok(Self {
            addr,
            requests,
            responses,
            accept_loop,
        })
    }

    /// Base URL of the server, for example `http://127.0.0.1:49152`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Appends a response to the script.
    pub fn push_response(&self, response: ScriptedResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    /// Snapshot of every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    requests: &Arc<Mutex<Vec<RecordedRequest>>>,
    response: ScriptedResponse,
) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    if let Ok(mut log) = requests.lock() {
        log.push(request);
    }

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    if response.drop_connection {
        return;
    }

    let reason = reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Status");
    let head = format!(
        "HTTP/1.1 {} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        response.status,
        response.body.len(),
    );
    let _write = stream.write_all(head.as_bytes()).await;
    let _body = stream.write_all(response.body.as_bytes()).await;
    let _flush = stream.flush().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0_u8; 1024];

    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(read) => buffer.extend_from_slice(chunk.get(..read)?),
        }
    };
    let received_at = Instant::now();

    let head = String::from_utf8(buffer.get(..header_end)?.to_vec()).ok()?;
    let mut body: Vec<u8> = buffer.get(header_end + 4..)?.to_vec();

    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    while body.len() < content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => body.extend_from_slice(chunk.get(..read)?),
        }
    }

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
        received_at,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Error type produced by [`RecordingApi`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake control-plane error: {0}")]
pub struct FakeApiError(pub String);

/// One import trigger recorded by [`RecordingApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportRecord {
    /// Kind the package was imported as.
    pub kind: PackageKind,
    /// Package name used for the import.
    pub name: String,
    /// Temporary storage URI passed as the content link.
    pub content_uri: String,
}

/// Scripted [`AutomationApi`] double that records every call.
///
/// `package_status` answers from a FIFO queue; when the queue is empty it
/// reports `Creating` forever, which is what timeout scenarios need.
#[derive(Clone, Debug, Default)]
pub struct RecordingApi {
    uploads: Arc<Mutex<Vec<Utf8PathBuf>>>,
    imports: Arc<Mutex<Vec<ImportRecord>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    status_queries: Arc<Mutex<Vec<String>>>,
    statuses: Arc<Mutex<VecDeque<Result<Option<PackageStatus>, FakeApiError>>>>,
    operations: Arc<Mutex<Vec<String>>>,
}

impl RecordingApi {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a status response with the given state and no error detail.
    pub fn push_state(&self, state: ProvisioningState) {
        self.push_status(Ok(Some(PackageStatus {
            state,
            error_message: None,
        })));
    }

    /// Queues a `Failed` status carrying a service error message.
    pub fn push_failed(&self, message: impl Into<String>) {
        self.push_status(Ok(Some(PackageStatus {
            state: ProvisioningState::Failed,
            error_message: Some(message.into()),
        })));
    }

    /// Queues an "absent" status response (service has no record).
    pub fn push_absent(&self) {
        self.push_status(Ok(None));
    }

    /// Queues a status query failure.
    pub fn push_status_error(&self, message: impl Into<String>) {
        self.push_status(Err(FakeApiError(message.into())));
    }

    fn push_status(&self, entry: Result<Option<PackageStatus>, FakeApiError>) {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.push_back(entry);
        }
    }

    /// Artifact paths passed to `upload_artifact`, in call order.
    #[must_use]
    pub fn uploads(&self) -> Vec<Utf8PathBuf> {
        self.uploads.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Import triggers in call order.
    #[must_use]
    pub fn imports(&self) -> Vec<ImportRecord> {
        self.imports.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Deleted package names in call order.
    #[must_use]
    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Package names queried for status, in call order.
    #[must_use]
    pub fn status_queries(&self) -> Vec<String> {
        self.status_queries
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Flat log of every call in arrival order, e.g. `delete:pip`,
    /// `upload`, `import:abc`. Useful for ordering assertions across call
    /// kinds.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.operations
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn record_operation(&self, entry: String) {
        if let Ok(mut log) = self.operations.lock() {
            log.push(entry);
        }
    }
}

impl AutomationApi for RecordingApi {
    type Error = FakeApiError;

    fn upload_artifact<'a>(&'a self, artifact: &'a Utf8Path) -> ApiFuture<'a, String, FakeApiError> {
        Box::pin(async move {
            self.record_operation(String::from("upload"));
            if let Ok(mut log) = self.uploads.lock() {
                log.push(artifact.to_owned());
            }
            Ok(format!("https://blob.example/temp/{}", self.uploads().len()))
        })
    }

    fn import_package<'a>(
        &'a self,
        kind: PackageKind,
        name: &'a str,
        content_uri: &'a str,
    ) -> ApiFuture<'a, (), FakeApiError> {
        Box::pin(async move {
            self.record_operation(format!("import:{name}"));
            if let Ok(mut log) = self.imports.lock() {
                log.push(ImportRecord {
                    kind,
                    name: name.to_owned(),
                    content_uri: content_uri.to_owned(),
                });
            }
            Ok(())
        })
    }

    fn package_status<'a>(
        &'a self,
        name: &'a str,
    ) -> ApiFuture<'a, Option<PackageStatus>, FakeApiError> {
        Box::pin(async move {
            self.record_operation(format!("status:{name}"));
            if let Ok(mut log) = self.status_queries.lock() {
                log.push(name.to_owned());
            }
            self.statuses
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or(Ok(Some(PackageStatus {
                    state: ProvisioningState::Creating,
                    error_message: None,
                })))
        })
    }

    fn delete_package<'a>(&'a self, name: &'a str) -> ApiFuture<'a, (), FakeApiError> {
        Box::pin(async move {
            self.record_operation(format!("delete:{name}"));
            if let Ok(mut log) = self.deletes.lock() {
                log.push(name.to_owned());
            }
            Ok(())
        })
    }
}
