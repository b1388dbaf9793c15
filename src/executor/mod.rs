//! Sequences a script artifact's path to remote execution.
//!
//! The executor owns policy only: which package kind an artifact maps to,
//! how many executions to trigger, when to wait for an import to finish.
//! All HTTP detail lives behind the [`AutomationApi`] trait.

use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::api::{AutomationApi, PackageKind, ProvisioningState};
use crate::progress::Progress;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(15);
const IMPORT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Reserved name of the interpreter's package-manager package. Replacing it
/// is the one step that intentionally overwrites a persistent remote
/// resource; every other import uses a freshly minted name.
const INTERPRETER_PACKAGE_NAME: &str = "pip";

/// How an artifact is executed, decided by its file extension.
///
/// The set of kinds is closed: a zipped module runs fire-and-forget, an
/// installable package goes through the blocking interpreter-replacement
/// step first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactKind {
    /// A pre-zipped script module (`.zip`).
    Module,
    /// A pre-built installable interpreter package (`.whl`).
    PythonPackage,
}

impl ArtifactKind {
    /// Resolves the kind from an artifact path.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::UnsupportedArtifact`] for any extension other
    /// than `zip` or `whl`.
    pub fn from_artifact(path: &Utf8Path) -> Result<Self, RequestError> {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("zip") => Ok(Self::Module),
            Some(ext) if ext.eq_ignore_ascii_case("whl") => Ok(Self::PythonPackage),
            other => Err(RequestError::UnsupportedArtifact {
                extension: other.unwrap_or("").to_owned(),
            }),
        }
    }
}

/// One validated execution request: an artifact and a repetition count.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionRequest {
    artifact: Utf8PathBuf,
    kind: ArtifactKind,
    count: u32,
}

impl ExecutionRequest {
    /// Validates the artifact extension and count and builds a request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ZeroCount`] when `count` is zero and
    /// [`RequestError::UnsupportedArtifact`] for an unrecognised extension.
    pub fn new(artifact: impl Into<Utf8PathBuf>, count: u32) -> Result<Self, RequestError> {
        let artifact = artifact.into();
        if count == 0 {
            return Err(RequestError::ZeroCount);
        }
        let kind = ArtifactKind::from_artifact(&artifact)?;
        Ok(Self {
            artifact,
            kind,
            count,
        })
    }

    /// Path of the artifact to upload.
    #[must_use]
    pub fn artifact(&self) -> &Utf8Path {
        &self.artifact
    }

    /// Resolved execution kind.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Number of executions to trigger.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }
}

/// Errors raised while validating an [`ExecutionRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when the artifact extension maps to no execution kind.
    #[error("artifact extension '{extension}' is not supported (expected .zip or .whl)")]
    UnsupportedArtifact {
        /// Extension found on the artifact path.
        extension: String,
    },
    /// Raised when the caller requests zero executions.
    #[error("execution count must be at least 1")]
    ZeroCount,
}

/// Errors surfaced while driving executions.
#[derive(Debug, Error)]
pub enum ExecutorError<ApiError>
where
    ApiError: std::error::Error + 'static,
{
    /// Raised when the request itself is invalid.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Raised when the artifact cannot be uploaded to temporary storage.
    #[error("failed to upload artifact: {0}")]
    Upload(#[source] ApiError),
    /// Raised when the import trigger is refused.
    #[error("failed to trigger import of package '{name}': {source}")]
    Import {
        /// Package name the import was addressed to.
        name: String,
        /// Underlying control-plane error.
        #[source]
        source: ApiError,
    },
    /// Raised when a status poll fails.
    #[error("failed to query status of package '{name}': {source}")]
    Status {
        /// Package name being polled.
        name: String,
        /// Underlying control-plane error.
        #[source]
        source: ApiError,
    },
    /// Raised when deleting a stale package fails.
    #[error("failed to delete stale package '{name}': {source}")]
    Cleanup {
        /// Package name that could not be deleted.
        name: String,
        /// Underlying control-plane error.
        #[source]
        source: ApiError,
    },
    /// Raised when polling finds no record of the package: the import flow
    /// never started.
    #[error("upload flow for package '{name}' has failed to be started")]
    ImportNeverStarted {
        /// Package name that never appeared.
        name: String,
    },
    /// Raised when the service reports the import as failed.
    #[error("import of package '{name}' failed: {message}")]
    ImportFailed {
        /// Package name that failed.
        name: String,
        /// Error message reported verbatim by the service.
        message: String,
    },
    /// Raised when the import does not reach a terminal state in time.
    #[error("import of package '{name}' did not finish within {seconds} seconds")]
    ImportTimeout {
        /// Package name being waited on.
        name: String,
        /// Timeout budget that elapsed.
        seconds: u64,
    },
}

/// Drives one or more executions of an artifact through the control plane.
#[derive(Debug)]
pub struct Executor<A> {
    api: A,
    progress: Progress,
    poll_interval: Duration,
    import_timeout: Duration,
}

impl<A: AutomationApi> Executor<A> {
    /// Creates an executor with production polling intervals.
    #[must_use]
    pub const fn new(api: A, progress: Progress) -> Self {
        Self {
            api,
            progress,
            poll_interval: STATUS_POLL_INTERVAL,
            import_timeout: IMPORT_WAIT_TIMEOUT,
        }
    }

    /// Overrides the status polling interval.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the import wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_import_timeout(mut self, timeout: Duration) -> Self {
        self.import_timeout = timeout;
        self
    }

    /// Runs the request to completion: every execution is triggered
    /// sequentially, and a failure in any step aborts the whole run.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] describing the first step that failed.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutorError<A::Error>> {
        match request.kind() {
            ArtifactKind::Module => self.run_modules(request).await,
            ArtifactKind::PythonPackage => self.run_python_packages(request).await,
        }
    }

    /// Fire-and-forget variant: each execution uploads the artifact and
    /// triggers a module import under a fresh unique name. The remote side's
    /// code execution is not observable through this API, so triggering the
    /// import is success.
    async fn run_modules(&self, request: &ExecutionRequest) -> Result<(), ExecutorError<A::Error>> {
        let count = request.count();
        self.progress
            .info(format!("attempting to execute the module {count} times"));
        for index in 1..=count {
            self.progress.info(format!("triggering execution {index}/{count}"));
            let step = self.progress.nested();
            let name = Uuid::new_v4().to_string();
            self.trigger_import(request.artifact(), PackageKind::Module, &name)
                .await?;
            step.debug("waiting for code execution remotely");
        }
        Ok(())
    }

    /// Blocking-then-fire-and-forget variant: first replace the account's
    /// interpreter package and wait for that import to succeed, then trigger
    /// the per-run imports under fresh unique names.
    async fn run_python_packages(
        &self,
        request: &ExecutionRequest,
    ) -> Result<(), ExecutorError<A::Error>> {
        self.replace_interpreter_package(request).await?;

        let count = request.count();
        self.progress
            .info(format!("attempting to execute the package {count} times"));
        for index in 1..=count {
            self.progress.info(format!("triggering execution {index}/{count}"));
            let step = self.progress.nested();
            let name = Uuid::new_v4().to_string();
            self.trigger_import(request.artifact(), PackageKind::Python3Package, &name)
                .await?;
            step.debug("waiting for code execution remotely");
        }
        Ok(())
    }

    /// Overwrites the account's well-known interpreter package with the
    /// request artifact and blocks until the import reaches a terminal
    /// state.
    ///
    /// A stale package under the reserved name is deleted first so the poll
    /// observes a fresh `Creating` transition instead of a leftover terminal
    /// state from an earlier invocation.
    async fn replace_interpreter_package(
        &self,
        request: &ExecutionRequest,
    ) -> Result<(), ExecutorError<A::Error>> {
        self.progress.info(format!(
            "replacing the '{INTERPRETER_PACKAGE_NAME}' package present in the account"
        ));
        let step = self.progress.nested();

        let existing = self
            .api
            .package_status(INTERPRETER_PACKAGE_NAME)
            .await
            .map_err(|source| ExecutorError::Status {
                name: INTERPRETER_PACKAGE_NAME.to_owned(),
                source,
            })?;
        if existing.is_some() {
            step.debug("stale package found; deleting it first");
            self.api
                .delete_package(INTERPRETER_PACKAGE_NAME)
                .await
                .map_err(|source| ExecutorError::Cleanup {
                    name: INTERPRETER_PACKAGE_NAME.to_owned(),
                    source,
                })?;
        }

        self.trigger_import(
            request.artifact(),
            PackageKind::Python3Package,
            INTERPRETER_PACKAGE_NAME,
        )
        .await?;
        self.wait_for_import(INTERPRETER_PACKAGE_NAME).await?;
        self.progress
            .info(format!("successfully replaced the '{INTERPRETER_PACKAGE_NAME}' package"));
        Ok(())
    }

    /// Uploads the artifact and triggers its import under `name`.
    async fn trigger_import(
        &self,
        artifact: &Utf8Path,
        kind: PackageKind,
        name: &str,
    ) -> Result<(), ExecutorError<A::Error>> {
        let content_uri = self
            .api
            .upload_artifact(artifact)
            .await
            .map_err(ExecutorError::Upload)?;
        self.api
            .import_package(kind, name, &content_uri)
            .await
            .map_err(|source| ExecutorError::Import {
                name: name.to_owned(),
                source,
            })
    }

    /// Polls the package status until a terminal state or the timeout.
    ///
    /// The interval is deliberately coarse: the loop only needs to detect
    /// terminal states, not track fine-grained progress.
    async fn wait_for_import(&self, name: &str) -> Result<(), ExecutorError<A::Error>> {
        let deadline = Instant::now() + self.import_timeout;
        while Instant::now() <= deadline {
            let status = self
                .api
                .package_status(name)
                .await
                .map_err(|source| ExecutorError::Status {
                    name: name.to_owned(),
                    source,
                })?;
            let Some(status) = status else {
                return Err(ExecutorError::ImportNeverStarted {
                    name: name.to_owned(),
                });
            };

            match status.state {
                ProvisioningState::Succeeded => return Ok(()),
                ProvisioningState::Failed => {
                    return Err(ExecutorError::ImportFailed {
                        name: name.to_owned(),
                        message: status
                            .error_message
                            .unwrap_or_else(|| String::from("no error detail reported")),
                    });
                }
                state => {
                    self.progress.debug(format!("upload state - '{state}'"));
                    sleep(self.poll_interval).await;
                }
            }
        }

        Err(ExecutorError::ImportTimeout {
            name: name.to_owned(),
            seconds: self.import_timeout.as_secs(),
        })
    }
}
