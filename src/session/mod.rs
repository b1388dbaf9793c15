//! Authenticated, rate-limited HTTP session against the Automation
//! control plane.
//!
//! The session is the only component that holds the bearer credential and
//! knows how URLs are constructed. Every outbound call funnels through one
//! dispatch primitive that paces requests (the service throttles bursts
//! aggressively) and absorbs transient failures behind a bounded retry loop.

mod error;

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::time::sleep;

use crate::api::{ApiFuture, AutomationApi, PackageEnvelope, PackageKind, PackageStatus};
use crate::config::AutomationConfig;
use crate::progress::Progress;

pub use error::SessionError;

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(500);
const RETRY_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_RETRIES: u32 = 5;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
const BLOB_TYPE_BLOCK: &str = "BlockBlob";

/// Timing and retry knobs for a session.
///
/// Production code uses [`SessionTuning::default`]; tests substitute
/// millisecond values to keep throttling and backoff scenarios fast.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTuning {
    /// Maximum attempts per request before giving up.
    pub retries: u32,
    /// Minimum spacing between the start times of consecutive requests.
    pub min_request_interval: Duration,
    /// Fixed pause after a transient failure before the next attempt.
    pub retry_backoff: Duration,
    /// Per-request network timeout.
    pub request_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            min_request_interval: MIN_REQUEST_INTERVAL,
            retry_backoff: RETRY_BACKOFF,
            request_timeout: HTTP_REQUEST_TIMEOUT,
        }
    }
}

/// Request body accepted by the dispatch primitive.
#[derive(Clone, Debug)]
enum Payload {
    None,
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

/// Validated session against one Automation account.
///
/// Created once per process; the access token is never refreshed and the
/// account's existence is only checked at construction time.
pub struct AutomationSession {
    http: reqwest::Client,
    config: AutomationConfig,
    access_token: String,
    progress: Progress,
    tuning: SessionTuning,
    next_request_at: Mutex<Option<Instant>>,
}

impl AutomationSession {
    /// Opens a session with default tuning, probing the account to verify
    /// that the identifier and the token are valid.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AccessDenied`] when the token is rejected,
    /// [`SessionError::InvalidAccountId`] or [`SessionError::AccountNotFound`]
    /// when the account identifier is malformed or absent, and
    /// [`SessionError::UnexpectedStatus`] for any other non-success probe
    /// response.
    pub async fn connect(
        config: AutomationConfig,
        access_token: impl Into<String>,
        progress: Progress,
    ) -> Result<Self, SessionError> {
        Self::connect_with(config, access_token, progress, SessionTuning::default()).await
    }

    /// Opens a session with explicit tuning. This is primarily used by tests
    /// to run the retry and pacing machinery with millisecond delays.
    ///
    /// # Errors
    ///
    /// See [`AutomationSession::connect`].
    pub async fn connect_with(
        config: AutomationConfig,
        access_token: impl Into<String>,
        progress: Progress,
        tuning: SessionTuning,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|err| SessionError::Config(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(tuning.request_timeout)
            .build()
            .map_err(|err| SessionError::Client(err.to_string()))?;
        let session = Self {
            http,
            config,
            access_token: access_token.into(),
            progress,
            tuning,
            next_request_at: Mutex::new(None),
        };

        let url = session.config.resource_url("");
        let response = session
            .dispatch(Method::GET, &url, HeaderMap::new(), true, &Payload::None)
            .await?;
        match response.status() {
            status if status.is_success() => {
                session.progress.info("access token is valid");
                Ok(session)
            }
            StatusCode::UNAUTHORIZED => Err(SessionError::AccessDenied),
            StatusCode::BAD_REQUEST => Err(SessionError::InvalidAccountId {
                account_id: session.config.account_id.clone(),
            }),
            StatusCode::NOT_FOUND => Err(SessionError::AccountNotFound {
                account_id: session.config.account_id.clone(),
            }),
            status => Err(SessionError::UnexpectedStatus {
                method: Method::GET.to_string(),
                url,
                status: status.as_u16(),
            }),
        }
    }

    /// Uploads a local file to server-issued temporary blob storage and
    /// returns the pre-authorised URI it was written to.
    ///
    /// Two sequential calls: one authenticated GET to obtain the URI, one
    /// unauthenticated PUT of the raw bytes (the URI itself carries the
    /// grant).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Artifact`] when the file cannot be read and
    /// the usual dispatch errors otherwise.
    pub async fn upload_artifact(&self, artifact: &Utf8Path) -> Result<String, SessionError> {
        let link_url = self.config.storage_link_request_url();
        let link_response = expect_success(
            self.dispatch(Method::GET, &link_url, HeaderMap::new(), true, &Payload::None)
                .await?,
            &Method::GET,
        )?;
        let upload_uri: String =
            link_response
                .json()
                .await
                .map_err(|err| SessionError::Decode {
                    url: link_url,
                    message: err.to_string(),
                })?;
        self.progress.debug("temporary blob storage created");

        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|err| SessionError::Artifact {
                path: artifact.to_owned(),
                message: err.to_string(),
            })?;
        let mut headers = HeaderMap::new();
        headers.insert(BLOB_TYPE_HEADER, HeaderValue::from_static(BLOB_TYPE_BLOCK));
        let blob_response = self
            .dispatch(Method::PUT, &upload_uri, headers, false, &Payload::Bytes(bytes))
            .await?;
        expect_success(blob_response, &Method::PUT)?;

        let file_name = artifact.file_name().unwrap_or("artifact");
        self.progress
            .debug(format!("file '{file_name}' uploaded to temporary storage"));
        Ok(upload_uri)
    }

    /// Triggers the asynchronous import of uploaded content as a package of
    /// the given kind. The service accepts and processes out of band; this
    /// call does not wait for completion.
    ///
    /// # Errors
    ///
    /// Returns a dispatch error when the request cannot be delivered or the
    /// service refuses it.
    pub async fn import_package(
        &self,
        kind: PackageKind,
        name: &str,
        content_uri: &str,
    ) -> Result<(), SessionError> {
        let url = self
            .config
            .resource_url(&format!("{}/{name}", kind.path_segment()));
        let body = serde_json::json!({
            "properties": {
                "contentLink": {
                    "uri": content_uri,
                }
            }
        });
        let response = self
            .dispatch(Method::PUT, &url, HeaderMap::new(), true, &Payload::Json(body))
            .await?;
        expect_success(response, &Method::PUT)?;
        self.progress
            .debug(format!("import of '{name}' triggered in the account"));
        Ok(())
    }

    /// Fetches the provisioning status of a package. A 404 is not an error
    /// here: it signals that the import has not created the resource.
    ///
    /// # Errors
    ///
    /// Returns a dispatch error for any response other than success or 404,
    /// or [`SessionError::Decode`] when the body is not a package envelope.
    pub async fn package_status(&self, name: &str) -> Result<Option<PackageStatus>, SessionError> {
        let url = self
            .config
            .resource_url(&format!("{}/{name}", PackageKind::Python3Package.path_segment()));
        let response = self
            .dispatch(Method::GET, &url, HeaderMap::new(), true, &Payload::None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let checked = expect_success(response, &Method::GET)?;
        let envelope: PackageEnvelope =
            checked.json().await.map_err(|err| SessionError::Decode {
                url,
                message: err.to_string(),
            })?;
        Ok(Some(envelope.into()))
    }

    /// Deletes a package by name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PackageNotFound`] when the service reports
    /// 404, and the usual dispatch errors otherwise.
    pub async fn delete_package(&self, name: &str) -> Result<(), SessionError> {
        let url = self
            .config
            .resource_url(&format!("{}/{name}", PackageKind::Python3Package.path_segment()));
        let response = self
            .dispatch(Method::DELETE, &url, HeaderMap::new(), true, &Payload::None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SessionError::PackageNotFound {
                name: name.to_owned(),
            });
        }
        expect_success(response, &Method::DELETE)?;
        Ok(())
    }

    /// Universal dispatch primitive: paces, authenticates, and retries.
    ///
    /// Transient failures (network timeout, connection error, truncated
    /// body, HTTP 429/502/503/504) are absorbed up to the configured attempt
    /// count with a fixed backoff between attempts. Any other response is
    /// returned as-is for the caller's status handling. PUT and POST retry
    /// identically to GET: the upload and import endpoints are safely
    /// re-issuable.
    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        authenticated: bool,
        payload: &Payload,
    ) -> Result<reqwest::Response, SessionError> {
        self.pace().await;

        if authenticated {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
                .map_err(|_| SessionError::InvalidAccessToken)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        for attempt in 1..=self.tuning.retries {
            let mut builder = self
                .http
                .request(method.clone(), url)
                .headers(headers.clone());
            builder = match payload {
                Payload::None => builder,
                Payload::Bytes(bytes) => builder.body(bytes.clone()),
                Payload::Json(value) => builder.json(value),
            };

            match builder.send().await {
                Ok(response) if is_transient_status(response.status()) => {
                    self.progress.debug(format!(
                        "status {} from the service; retrying (attempt {attempt}/{})",
                        response.status().as_u16(),
                        self.tuning.retries,
                    ));
                    sleep(self.tuning.retry_backoff).await;
                }
                Ok(response) => return Ok(response),
                Err(err) if is_transient_transport(&err) => {
                    self.progress.debug(format!(
                        "transport failure ({err}); retrying (attempt {attempt}/{})",
                        self.tuning.retries,
                    ));
                    sleep(self.tuning.retry_backoff).await;
                }
                Err(err) => {
                    return Err(SessionError::Transport {
                        method: method.to_string(),
                        url: url.to_owned(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Err(SessionError::RetriesExhausted {
            method: method.to_string(),
            url: url.to_owned(),
        })
    }

    /// Sleeps until at least the minimum interval has elapsed since the
    /// previous request started, then claims the next slot.
    ///
    /// The gate is a plain mutex because the session is driven by a single
    /// sequential call path; the lock is never held across an await.
    async fn pace(&self) {
        let wait = self
            .next_request_at
            .lock()
            .ok()
            .and_then(|gate| *gate)
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            sleep(wait).await;
        }
        if let Ok(mut gate) = self.next_request_at.lock() {
            *gate = Some(Instant::now() + self.tuning.min_request_interval);
        }
    }
}

impl fmt::Debug for AutomationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomationSession")
            .field("account_id", &self.config.account_id)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl AutomationApi for AutomationSession {
    type Error = SessionError;

    fn upload_artifact<'a>(&'a self, artifact: &'a Utf8Path) -> ApiFuture<'a, String, SessionError> {
        Box::pin(self.upload_artifact(artifact))
    }

    fn import_package<'a>(
        &'a self,
        kind: PackageKind,
        name: &'a str,
        content_uri: &'a str,
    ) -> ApiFuture<'a, (), SessionError> {
        Box::pin(self.import_package(kind, name, content_uri))
    }

    fn package_status<'a>(
        &'a self,
        name: &'a str,
    ) -> ApiFuture<'a, Option<PackageStatus>, SessionError> {
        Box::pin(self.package_status(name))
    }

    fn delete_package<'a>(&'a self, name: &'a str) -> ApiFuture<'a, (), SessionError> {
        Box::pin(self.delete_package(name))
    }
}

fn expect_success(
    response: reqwest::Response,
    method: &Method,
) -> Result<reqwest::Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SessionError::UnexpectedStatus {
            method: method.to_string(),
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_transient_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

#[cfg(test)]
mod tests;
