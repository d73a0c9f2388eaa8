use std::{fmt, path::PathBuf, time::Duration};

use shared::error::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned status {status}: {}", .message.as_deref().unwrap_or("no detail"))]
    Status { status: u16, message: Option<String> },
    #[error("malformed response body: {0}")]
    MalformedBody(#[from] ProtocolError),
    #[error("failed to read local file '{}': {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request was cancelled")]
    Cancelled,
    #[error("invalid server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::Network(_) | ClientError::InvalidServerUrl { .. } => FailureKind::Network,
            ClientError::Status { .. } => FailureKind::NonSuccessStatus,
            ClientError::MalformedBody(_) => FailureKind::MalformedResponseBody,
            ClientError::LocalFile { .. } => FailureKind::LocalFile,
            ClientError::Timeout(_) => FailureKind::Timeout,
            ClientError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Coarse classification of a failed upload or chat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Network,
    NonSuccessStatus,
    MalformedResponseBody,
    LocalFile,
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Network => "network failure",
            FailureKind::NonSuccessStatus => "non-success status",
            FailureKind::MalformedResponseBody => "malformed response body",
            FailureKind::LocalFile => "local file error",
            FailureKind::Timeout => "timed out",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session worker has stopped")]
pub struct SessionClosed;
