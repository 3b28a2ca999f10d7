// ABOUTME: Error types for codebox-client
// ABOUTME: Separates missing configuration, transport failures and server-reported RPC failures

use thiserror::Error;

/// Errors that can occur in codebox-client operations
#[derive(Debug, Error)]
pub enum CodeboxError {
    /// An operation needed the base address before a workspace was attached.
    #[error("Not configured: no codebox base address is set")]
    NotConfigured,

    /// The request or connection failed below the RPC envelope.
    ///
    /// The message is diagnostic only and carries no server payload.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The server answered with `ok: false`; holds its `error` value verbatim.
    #[error("RPC failed: {0}")]
    Rpc(serde_json::Value),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Arguments could not be encoded for the chosen request mode.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T, E = CodeboxError> = std::result::Result<T, E>;

impl CodeboxError {
    /// The server's error payload, present only for RPC-level failures.
    pub fn rpc_error(&self) -> Option<&serde_json::Value> {
        match self {
            CodeboxError::Rpc(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CodeboxError::Transport(_))
    }
}

impl From<reqwest::Error> for CodeboxError {
    fn from(err: reqwest::Error) -> Self {
        CodeboxError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for CodeboxError {
    fn from(err: url::ParseError) -> Self {
        CodeboxError::InvalidUrl(err.to_string())
    }
}
