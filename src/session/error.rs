//! Error types for the Automation session.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by [`crate::session::AutomationSession`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when the supplied configuration fails validation.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the HTTP client cannot be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    /// Raised when the access token cannot be carried in a header.
    #[error("access token contains characters that are not valid in a header")]
    InvalidAccessToken,
    /// Raised when the control plane rejects the access token.
    #[error("access token provided is not valid")]
    AccessDenied,
    /// Raised when the control plane reports the account identifier as
    /// malformed.
    #[error("automation account ID provided is not valid - '{account_id}'")]
    InvalidAccountId {
        /// Identifier supplied by the caller.
        account_id: String,
    },
    /// Raised when the target account does not exist.
    #[error("automation account does not exist - '{account_id}'")]
    AccountNotFound {
        /// Identifier supplied by the caller.
        account_id: String,
    },
    /// Raised when a request fails at the transport level with an error that
    /// is not classified as transient.
    #[error("transport failure during {method} {url}: {message}")]
    Transport {
        /// HTTP method of the failed request.
        method: String,
        /// Target URL.
        url: String,
        /// Client-reported failure detail.
        message: String,
    },
    /// Raised when every retry attempt was consumed by transient failures.
    #[error("failed to send HTTP request - reached maximum retries. Method - '{method}', url - '{url}'")]
    RetriesExhausted {
        /// HTTP method of the failed request.
        method: String,
        /// Target URL.
        url: String,
    },
    /// Raised when the service answers with an unexpected HTTP status.
    #[error("unexpected status {status} from {method} {url}")]
    UnexpectedStatus {
        /// HTTP method of the request.
        method: String,
        /// Target URL.
        url: String,
        /// Status code returned by the service.
        status: u16,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// URL that produced the body.
        url: String,
        /// Decoder failure detail.
        message: String,
    },
    /// Raised when the local artifact cannot be read.
    #[error("failed to read artifact '{path}': {message}")]
    Artifact {
        /// Path of the artifact.
        path: Utf8PathBuf,
        /// Filesystem failure detail.
        message: String,
    },
    /// Raised when deleting a package the service has no record of.
    #[error("failed to delete package '{name}'. Package does not exist")]
    PackageNotFound {
        /// Name of the missing package.
        name: String,
    },
}
