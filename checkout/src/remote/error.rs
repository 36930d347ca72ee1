//! Errors raised while talking to remote collaborators.

use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced a response (connect, TLS, reset...).
    #[error("request failed: {0}")]
    Transport(String),

    /// The collaborator answered with a non-success HTTP status and no
    /// usable error body.
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The URL that was called.
        url: String,
    },

    /// The collaborator understood the request and said no. The message is
    /// theirs, verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// No answer within the allotted time.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// A base URL was missing or malformed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if e.is_timeout() {
            RemoteError::Timeout(0)
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Decode(e.to_string())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
