use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use shared::{
    domain::UploadReference,
    error::ErrorBody,
    protocol::{ChatQuery, ChatResponse, UploadResponse, CHAT_PATH, UPLOAD_FIELD, UPLOAD_PATH},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{error::ClientError, upload::LocalFile};

/// The two remote collaborators: file storage and the chat assistant.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn upload(&self, file: &LocalFile) -> Result<UploadReference, ClientError>;
    async fn chat(&self, query: &ChatQuery) -> Result<ChatResponse, ClientError>;
}

pub struct HttpAssistantApi {
    http: Client,
    server_url: String,
}

impl HttpAssistantApi {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, ClientError> {
        Url::parse(server_url).map_err(|source| ClientError::InvalidServerUrl {
            url: server_url.to_string(),
            source,
        })?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn upload(&self, file: &LocalFile) -> Result<UploadReference, ClientError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|source| ClientError::LocalFile {
                path: file.path.clone(),
                source,
            })?;
        let mime = mime_guess::from_path(&file.path).first_or_octet_stream();
        debug!(file = %file.file_name, size = bytes.len(), mime = %mime, "uploading file");

        let part = Part::bytes(bytes)
            .file_name(file.file_name.clone())
            .mime_str(mime.essence_str())?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .http
            .post(format!("{}{UPLOAD_PATH}", self.server_url))
            .multipart(form)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        Ok(UploadResponse::decode(&body)?)
    }

    async fn chat(&self, query: &ChatQuery) -> Result<ChatResponse, ClientError> {
        let response = self
            .http
            .get(format!("{}{CHAT_PATH}", self.server_url))
            .query(query)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        Ok(ChatResponse::decode(&body)?)
    }
}

async fn read_success_body(response: Response) -> Result<Vec<u8>, ClientError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(ClientError::Status {
            status: status.as_u16(),
            message: ErrorBody::message_from_slice(&body),
        });
    }
    Ok(body.to_vec())
}

/// Runs `call` until it finishes, `timeout` elapses, or `cancel` fires,
/// whichever comes first.
pub async fn bounded<T, F>(
    call: F,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let limited = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(ClientError::Timeout(limit))),
            None => call.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = limited => result,
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
