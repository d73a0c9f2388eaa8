//! Conversation Controller: owns the message log, the draft, and the single
//! in-flight chat request.

use chrono::Utc;
use shared::{
    domain::{ChatRequestId, Message, MessageId, Role, UploadReference},
    protocol::{ChatQuery, ChatResponse},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ClientSettings,
    error::{ClientError, FailureKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponse { request: ChatRequestId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error("nothing to send: draft is blank and no upload is active")]
    Empty,
    #[error("a chat request is already in flight")]
    Pending,
}

/// Everything needed to issue the chat call for one accepted submit.
#[derive(Debug, Clone)]
pub struct ChatTicket {
    pub request: ChatRequestId,
    pub query: ChatQuery,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFailure {
    pub request: ChatRequestId,
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Answered(Message),
    Failed(ChatFailure),
    /// Completion for a request that is not the one in flight.
    Stale,
}

pub struct ConversationController {
    log: Vec<Message>,
    draft: String,
    phase: Phase,
    next_message: MessageId,
    next_request: ChatRequestId,
    in_flight_cancel: Option<CancellationToken>,
    failures: Vec<ChatFailure>,
    fallback_reply: String,
    forward_upload_reference: bool,
}

impl ConversationController {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            log: Vec::new(),
            draft: String::new(),
            phase: Phase::Idle,
            next_message: MessageId(1),
            next_request: ChatRequestId(1),
            in_flight_cancel: None,
            failures: Vec::new(),
            fallback_reply: settings.fallback_reply.clone(),
            forward_upload_reference: settings.forward_upload_reference,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::AwaitingResponse { .. })
    }

    pub fn failures(&self) -> &[ChatFailure] {
        &self.failures
    }

    /// Accepts the current draft, appends it as a user message and moves to
    /// `AwaitingResponse`. A rejected submit changes nothing, draft included.
    pub fn submit(
        &mut self,
        upload: Option<&UploadReference>,
    ) -> Result<ChatTicket, SubmitRejection> {
        if self.is_pending() {
            debug!("submit ignored: chat request already in flight");
            return Err(SubmitRejection::Pending);
        }
        if self.draft.trim().is_empty() && upload.is_none() {
            debug!("submit ignored: blank draft without upload");
            return Err(SubmitRejection::Empty);
        }

        let text = std::mem::take(&mut self.draft);
        self.append(Role::User, text.clone());

        let request = self.next_request;
        self.next_request = request.next();
        self.phase = Phase::AwaitingResponse { request };

        let cancel = CancellationToken::new();
        self.in_flight_cancel = Some(cancel.clone());

        let uploaded_file_url = upload
            .filter(|_| self.forward_upload_reference)
            .map(|reference| reference.as_str().to_string());

        info!(
            request = %request,
            with_upload = uploaded_file_url.is_some(),
            "chat request accepted"
        );

        Ok(ChatTicket {
            request,
            query: ChatQuery {
                query: text,
                uploaded_file_url,
            },
            cancel,
        })
    }

    /// Applies the result of the chat call for `request` and returns to
    /// `Idle`. Failures append nothing to the log.
    pub fn complete(
        &mut self,
        request: ChatRequestId,
        result: Result<ChatResponse, ClientError>,
    ) -> ChatOutcome {
        if self.phase != (Phase::AwaitingResponse { request }) {
            warn!(request = %request, "ignoring stale chat completion");
            return ChatOutcome::Stale;
        }
        self.phase = Phase::Idle;
        self.in_flight_cancel = None;

        match result {
            Ok(response) => {
                let content = response
                    .into_reply()
                    .unwrap_or_else(|| self.fallback_reply.clone());
                let message = self.append(Role::Assistant, content);
                info!(request = %request, message = %message.id, "chat reply appended");
                ChatOutcome::Answered(message)
            }
            Err(err) => {
                let failure = ChatFailure {
                    request,
                    kind: err.kind(),
                    detail: err.to_string(),
                };
                warn!(request = %request, kind = %failure.kind, "chat request failed: {err}");
                self.failures.push(failure.clone());
                ChatOutcome::Failed(failure)
            }
        }
    }

    /// Trips the cancellation token of the in-flight request, if any. The
    /// completion still has to arrive to return the controller to `Idle`.
    pub fn cancel_in_flight(&mut self) -> bool {
        match &self.in_flight_cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn append(&mut self, role: Role, content: String) -> Message {
        let message = Message {
            id: self.next_message,
            role,
            content,
            created_at: Utc::now(),
        };
        self.next_message = self.next_message.next();
        self.log.push(message.clone());
        message
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
