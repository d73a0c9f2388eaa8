use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure body returned by the storage endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Best-effort parse of a failure body; returns the server message when
    /// one is present and non-empty.
    pub fn message_from_slice(body: &[u8]) -> Option<String> {
        serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .filter(|message| !message.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response body is missing field `{0}`")]
    MissingField(&'static str),
}
