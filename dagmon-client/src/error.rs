//! Error types for the dagmon fetch layer

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while fetching status sources for a task
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed (connectivity, timeout)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// A status source returned a non-200 response
    #[error("unexpected status {status} fetching {url}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// The URL that was fetched
        url: String,
    },

    /// The node status snapshot is not available yet.
    ///
    /// Distinct from [`ClientError::UnexpectedStatus`] because the caller maps
    /// it to a retriable `UNKNOWN` document rather than a hard failure: the
    /// snapshot appears shortly after submission.
    #[error("node status file not currently available")]
    NodeStateUnavailable,

    /// Failed to parse a fetched payload
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Check if this error should be surfaced as a retriable condition
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NodeStateUnavailable)
    }
}

/// Error from the batch scheduler query.
///
/// Connectivity failures are non-fatal to the caller; the aggregator maps
/// them to an `UNKNOWN` status document.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to contact scheduler: {0}")]
    Unreachable(String),
}
