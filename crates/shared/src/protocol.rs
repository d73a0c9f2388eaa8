use serde::{Deserialize, Serialize};

use crate::{domain::UploadReference, error::ProtocolError};

pub const UPLOAD_PATH: &str = "/upload";
pub const CHAT_PATH: &str = "/chat";
/// Multipart field carrying the file bytes.
pub const UPLOAD_FIELD: &str = "file";
pub const QUERY_PARAM: &str = "query";
pub const UPLOADED_FILE_PARAM: &str = "uploadedFileUrl";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl UploadResponse {
    pub fn decode(body: &[u8]) -> Result<UploadReference, ProtocolError> {
        let parsed: UploadResponse = serde_json::from_slice(body)?;
        parsed
            .file_url
            .filter(|url| !url.trim().is_empty())
            .map(UploadReference::new)
            .ok_or(ProtocolError::MissingField("fileUrl"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_file_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChatResponse {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// The assistant text, or `None` when the server sent nothing usable.
    pub fn into_reply(self) -> Option<String> {
        self.message.filter(|message| !message.is_empty())
    }
}
