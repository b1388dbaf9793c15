//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default control-plane base URL.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

/// Default endpoint that issues pre-authorised temporary storage URIs.
pub const DEFAULT_STORAGE_LINK_URL: &str =
    "https://s2.automation.ext.azure.com/api/Orchestrator/GenerateSasLinkUri";

/// Default control-plane API version.
pub const DEFAULT_API_VERSION: &str = "2018-06-30";

/// Automation account configuration derived from environment variables,
/// configuration files, and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SKYLIFT")]
pub struct AutomationConfig {
    /// Path-like identifier of the target Automation account, for example
    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Automation/automationAccounts/{name}`.
    pub account_id: String,
    /// Base URL of the management control plane.
    #[ortho_config(default = "https://management.azure.com".to_owned())]
    pub management_url: String,
    /// Endpoint that issues temporary blob storage URIs.
    #[ortho_config(
        default = "https://s2.automation.ext.azure.com/api/Orchestrator/GenerateSasLinkUri"
            .to_owned()
    )]
    pub storage_link_url: String,
    /// API version appended to every management request.
    #[ortho_config(default = "2018-06-30".to_owned())]
    pub api_version: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl AutomationConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to skylift.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, and environment variables in that
    /// order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("skylift")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key that supply a missing
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or [`ConfigError::InvalidAccountId`] when the account identifier is
    /// not a `/subscriptions/...` path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.account_id,
            &FieldMetadata::new("Automation account ID", "SKYLIFT_ACCOUNT_ID", "account_id"),
        )?;
        if !self.account_id.starts_with("/subscriptions/") {
            return Err(ConfigError::InvalidAccountId {
                account_id: self.account_id.clone(),
            });
        }
        Self::require_field(
            &self.management_url,
            &FieldMetadata::new(
                "management base URL",
                "SKYLIFT_MANAGEMENT_URL",
                "management_url",
            ),
        )?;
        Self::require_field(
            &self.storage_link_url,
            &FieldMetadata::new(
                "temporary storage endpoint",
                "SKYLIFT_STORAGE_LINK_URL",
                "storage_link_url",
            ),
        )?;
        Self::require_field(
            &self.api_version,
            &FieldMetadata::new("API version", "SKYLIFT_API_VERSION", "api_version"),
        )?;
        Ok(())
    }

    /// Builds the URL for a sub-resource of the account. An empty `path`
    /// addresses the account itself.
    #[must_use]
    pub fn resource_url(&self, path: &str) -> String {
        let base = self.management_url.trim_end_matches('/');
        let account = self.account_id.trim_matches('/');
        if path.is_empty() {
            format!("{base}/{account}?api-version={}", self.api_version)
        } else {
            format!("{base}/{account}/{path}?api-version={}", self.api_version)
        }
    }

    /// Builds the URL that requests a temporary storage URI scoped to the
    /// account.
    #[must_use]
    pub fn storage_link_request_url(&self) -> String {
        format!(
            "{}?accountId={}&assetType=Module",
            self.storage_link_url, self.account_id
        )
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when merging configuration sources fails.
    #[error("failed to load configuration: {0}")]
    Parse(String),
    /// Raised when a required field is empty.
    #[error("{0}")]
    MissingField(String),
    /// Raised when the account identifier is not a resource path.
    #[error("automation account ID is not valid - '{account_id}'")]
    InvalidAccountId {
        /// Identifier supplied by the caller.
        account_id: String,
    },
}
