//! Error types for the Keycloak harness.

use thiserror::Error;

/// Harness operation result type.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Harness errors.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A remote shell command or file copy failed
    #[error("Remote command `{command}` failed (exit status {status:?}): {stderr}")]
    Remote {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    /// A bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The admin API answered with a non-success status
    #[error("Keycloak API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller input that cannot be passed to the node
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (local scratch files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed server URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl HarnessError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether this error is a failed remote command.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}
