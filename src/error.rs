//! Error types for Skyhook

use thiserror::Error;

/// Result type for Skyhook operations
pub type Result<T> = std::result::Result<T, SkyhookError>;

/// Skyhook error types
#[derive(Error, Debug)]
pub enum SkyhookError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Malformed version: {0}")]
    MalformedVersion(String),

    #[error("Invalid release format: {0}")]
    InvalidReleaseFormat(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("SSH key not found on provider account: {0}")]
    SshKeyMissing(String),

    #[error("Invalid SSH key: {0}")]
    InvalidSshKey(String),

    #[error("VM has no public address: {0}")]
    NoPublicAddress(String),

    #[error("Cluster already deployed: {0}")]
    AlreadyDeployed(String),

    #[error("Nothing is deployed from this directory")]
    NotDeployed,

    #[error("Remote command failed with status {status}: {message}")]
    RemoteCommandFailed { status: i32, message: String },

    #[error("Unsupported cloud: {0}")]
    UnsupportedCloud(String),

    #[error("No API token configured for {0}")]
    MissingCredentials(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for SkyhookError {
    fn from(err: reqwest::Error) -> Self {
        SkyhookError::NetworkUnavailable(err.to_string())
    }
}

impl From<ssh2::Error> for SkyhookError {
    fn from(err: ssh2::Error) -> Self {
        SkyhookError::NetworkUnavailable(format!("ssh: {}", err))
    }
}
