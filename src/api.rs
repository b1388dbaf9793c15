//! Control-plane abstraction for package upload and import.
//!
//! The trait is the seam between the [`crate::executor`] policy layer and the
//! HTTP session: executors only see uploads, imports, status queries, and
//! deletions, never URLs or credentials.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;
use serde::Deserialize;

/// Kind of package resource an artifact is imported as.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PackageKind {
    /// A zipped script module.
    Module,
    /// An installable interpreter package.
    Python3Package,
}

impl PackageKind {
    /// Returns the URL path segment for this resource kind.
    #[must_use]
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Module => "modules",
            Self::Python3Package => "python3Packages",
        }
    }
}

/// Service-reported lifecycle stage of an uploaded package.
///
/// The service owns this set and may add stages; anything unrecognised maps
/// to [`ProvisioningState::Other`] and is treated as still in progress. Only
/// `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum ProvisioningState {
    /// Import accepted, resource being created.
    Creating,
    /// Uploaded content passed validation.
    ContentValidated,
    /// Content fetched from the temporary storage URI.
    ContentDownloaded,
    /// Connection types declared by the package were registered.
    ConnectionTypeImported,
    /// The import runbook is executing.
    RunningImportModuleRunbook,
    /// Terminal: the package is imported.
    Succeeded,
    /// Terminal: the import failed.
    Failed,
    /// Any stage this client does not know about.
    #[serde(other)]
    Other,
}

impl ProvisioningState {
    /// Returns true when no further transition will occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Creating => "Creating",
            Self::ContentValidated => "ContentValidated",
            Self::ContentDownloaded => "ContentDownloaded",
            Self::ConnectionTypeImported => "ConnectionTypeImported",
            Self::RunningImportModuleRunbook => "RunningImportModuleRunbook",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Decoded status of a remote package resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageStatus {
    /// Current provisioning stage.
    pub state: ProvisioningState,
    /// Error message reported by the service when `state` is `Failed`.
    pub error_message: Option<String>,
}

/// Wire envelope for a package resource.
#[derive(Debug, Deserialize)]
pub(crate) struct PackageEnvelope {
    properties: PackageProperties,
}

#[derive(Debug, Deserialize)]
struct PackageProperties {
    #[serde(rename = "provisioningState")]
    provisioning_state: ProvisioningState,
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl From<PackageEnvelope> for PackageStatus {
    fn from(envelope: PackageEnvelope) -> Self {
        Self {
            state: envelope.properties.provisioning_state,
            error_message: envelope.properties.error.and_then(|detail| detail.message),
        }
    }
}

/// Future returned by control-plane operations.
pub type ApiFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface the executor needs from the control plane.
pub trait AutomationApi {
    /// Transport-specific error type returned by the implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Uploads a local artifact to temporary storage and returns the
    /// server-issued URI granting read access to it.
    fn upload_artifact<'a>(&'a self, artifact: &'a Utf8Path) -> ApiFuture<'a, String, Self::Error>;

    /// Triggers an asynchronous import of previously uploaded content under
    /// the given package name. Returns as soon as the service accepts the
    /// request.
    fn import_package<'a>(
        &'a self,
        kind: PackageKind,
        name: &'a str,
        content_uri: &'a str,
    ) -> ApiFuture<'a, (), Self::Error>;

    /// Fetches the status of a package, or `None` when the service has no
    /// record of it.
    fn package_status<'a>(
        &'a self,
        name: &'a str,
    ) -> ApiFuture<'a, Option<PackageStatus>, Self::Error>;

    /// Deletes a package by name.
    fn delete_package<'a>(&'a self, name: &'a str) -> ApiFuture<'a, (), Self::Error>;
}
