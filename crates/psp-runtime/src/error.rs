//! Error types for the runtime crate.

use psp_core::{CatalogError, ErrorCode};

/// Durable store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode or decode stored value: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Catalog / exempt-list resource failures.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read resource: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Timed out loading {resource} after {after_ms}ms")]
    Timeout { resource: &'static str, after_ms: u64 },
    #[error("Invalid catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Invalid exempt-domain list: {0}")]
    Exempt(serde_json::Error),
    #[error("Resource not configured: {0}")]
    NotConfigured(&'static str),
}

/// Channel-level failures between a page agent and the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Channel not ready")]
    ChannelNotReady,
    #[error("No receiver on the other end")]
    NoReceiver,
    #[error("Failed to encode message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Service unavailable after {attempts} attempts: {last}")]
    Unavailable {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// Only "not ready" and "no receiver" are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChannelNotReady | Self::NoReceiver)
    }
}

/// Typed protocol client failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(TransportError),
    #[error("Transport error: {0}")]
    Transport(TransportError),
    #[error("Coordinator error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },
    #[error("Unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: String,
    },
}

impl ClientError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable { .. } => Self::Unavailable(e),
            other => Self::Transport(other),
        }
    }
}

/// Page agent failures.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Coordinator served an invalid catalog: {0}")]
    Catalog(#[from] CatalogError),
}

impl AgentError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_unavailable())
    }
}

/// Coordinator-side failures.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Runtime configuration file failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
