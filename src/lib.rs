//! Core library for the skylift upload tool.
//!
//! The crate drives a cloud Automation account's control plane to run
//! package imports: a hardened HTTP session (pacing, bounded retries,
//! bearer auth) uploads an artifact to temporary blob storage and triggers
//! an import. The blocking interpreter-package replacement additionally
//! polls the provisioning state until it is terminal.

pub mod api;
pub mod config;
pub mod executor;
pub mod progress;
pub mod session;
pub mod test_support;

pub use api::{AutomationApi, PackageKind, PackageStatus, ProvisioningState};
pub use config::{AutomationConfig, ConfigError};
pub use executor::{ArtifactKind, ExecutionRequest, Executor, ExecutorError, RequestError};
pub use progress::Progress;
pub use session::{AutomationSession, SessionError, SessionTuning};
