//! Session worker: owns both controllers and applies every user action and
//! network completion from a single queue.

use std::sync::Arc;

use shared::{
    domain::{ChatRequestId, Message, UploadId, UploadReference},
    protocol::ChatResponse,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::{
    config::ClientSettings,
    conversation::{ChatFailure, ChatOutcome, ConversationController, SubmitRejection},
    error::{ClientError, SessionClosed},
    transport::{bounded, AssistantApi},
    upload::{LocalFile, UploadCoordinator, UploadOutcome},
    ClientEvent,
};

const COMMAND_QUEUE_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 1024;

enum SessionCommand {
    SetDraft(String),
    SelectFile(LocalFile),
    Upload {
        file: LocalFile,
        reply: oneshot::Sender<UploadId>,
    },
    Submit {
        reply: oneshot::Sender<Result<ChatRequestId, SubmitRejection>>,
    },
    CancelChat,
    CancelUploads,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

enum Completion {
    Chat {
        request: ChatRequestId,
        result: Result<ChatResponse, ClientError>,
    },
    Upload {
        upload: UploadId,
        result: Result<UploadReference, ClientError>,
    },
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub draft: String,
    pub pending: bool,
    pub selected_file: Option<LocalFile>,
    pub upload_reference: Option<UploadReference>,
    pub uploads_in_flight: usize,
    pub failures: Vec<ChatFailure>,
}

pub struct Session;

impl Session {
    /// Starts the worker on the current tokio runtime. The worker stops once
    /// every [`SessionHandle`] is dropped.
    pub fn spawn(api: Arc<dyn AssistantApi>, settings: ClientSettings) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (pending_tx, pending_rx) = watch::channel(false);
        let (uploads_tx, uploads_rx) = watch::channel(0usize);

        let worker = SessionWorker {
            api,
            conversation: ConversationController::new(&settings),
            uploads: UploadCoordinator::new(),
            settings,
            events: events.clone(),
            completions_tx,
            pending_tx,
            uploads_tx,
        };
        tokio::spawn(worker.run(commands_rx, completions_rx));

        SessionHandle {
            commands: commands_tx,
            events,
            pending: pending_rx,
            uploads_in_flight: uploads_rx,
        }
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<ClientEvent>,
    pending: watch::Receiver<bool>,
    uploads_in_flight: watch::Receiver<usize>,
}

impl SessionHandle {
    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SetDraft(text.into())).await
    }

    pub async fn select_file(&self, file: LocalFile) -> Result<(), SessionClosed> {
        self.send(SessionCommand::SelectFile(file)).await
    }

    /// Selects `file` and starts uploading it. Resolves once the upload has
    /// been dispatched, not when it finishes.
    pub async fn upload(&self, file: LocalFile) -> Result<UploadId, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Upload { file, reply }).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Submits the current draft. Resolves once the submit has been applied.
    pub async fn submit(&self) -> Result<Result<ChatRequestId, SubmitRejection>, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Submit { reply }).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    /// Replaces the draft with `text` and submits it.
    pub async fn send_text(
        &self,
        text: impl Into<String>,
    ) -> Result<Result<ChatRequestId, SubmitRejection>, SessionClosed> {
        self.set_draft(text).await?;
        self.submit().await
    }

    pub async fn cancel_chat(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::CancelChat).await
    }

    pub async fn cancel_uploads(&self) -> Result<(), SessionClosed> {
        self.send(SessionCommand::CancelUploads).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.borrow()
    }

    /// Waits until no chat request is in flight.
    pub async fn wait_idle(&self) -> Result<(), SessionClosed> {
        let mut pending = self.pending.clone();
        pending
            .wait_for(|pending| !*pending)
            .await
            .map(|_| ())
            .map_err(|_| SessionClosed)
    }

    /// Waits until every dispatched upload has completed.
    pub async fn wait_uploads(&self) -> Result<(), SessionClosed> {
        let mut in_flight = self.uploads_in_flight.clone();
        in_flight
            .wait_for(|count| *count == 0)
            .await
            .map(|_| ())
            .map_err(|_| SessionClosed)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.commands.send(command).await.map_err(|_| SessionClosed)
    }
}

struct SessionWorker {
    api: Arc<dyn AssistantApi>,
    settings: ClientSettings,
    conversation: ConversationController,
    uploads: UploadCoordinator,
    events: broadcast::Sender<ClientEvent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    pending_tx: watch::Sender<bool>,
    uploads_tx: watch::Sender<usize>,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(server = %self.settings.server_url, "session started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }
        // Outstanding calls have nobody left to report to.
        self.conversation.cancel_in_flight();
        self.uploads.cancel_uploads();
        info!("session stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetDraft(text) => self.conversation.set_draft(text),
            SessionCommand::SelectFile(file) => self.select_file(file),
            SessionCommand::Upload { file, reply } => {
                let upload = self.start_upload(file);
                let _ = reply.send(upload);
            }
            SessionCommand::Submit { reply } => {
                let result = self.submit();
                let _ = reply.send(result);
            }
            SessionCommand::CancelChat => {
                if self.conversation.cancel_in_flight() {
                    info!("chat request cancellation requested");
                }
            }
            SessionCommand::CancelUploads => {
                let cancelled = self.uploads.cancel_uploads();
                if cancelled > 0 {
                    info!(cancelled, "upload cancellation requested");
                }
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn select_file(&mut self, file: LocalFile) {
        self.uploads.select_file(file.clone());
        self.emit(ClientEvent::FileSelected(file));
    }

    fn start_upload(&mut self, file: LocalFile) -> UploadId {
        self.select_file(file.clone());
        let ticket = self.uploads.begin_upload(file);
        self.uploads_tx.send_replace(self.uploads.in_flight());
        self.emit(ClientEvent::UploadStarted {
            upload: ticket.upload,
            file_name: ticket.file.file_name.clone(),
        });

        let upload = ticket.upload;
        let api = self.api.clone();
        let timeout = self.settings.upload_timeout;
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = bounded(api.upload(&ticket.file), timeout, &ticket.cancel).await;
            let _ = completions.send(Completion::Upload {
                upload: ticket.upload,
                result,
            });
        });
        upload
    }

    fn submit(&mut self) -> Result<ChatRequestId, SubmitRejection> {
        let ticket = match self
            .conversation
            .submit(self.uploads.current_reference())
        {
            Ok(ticket) => ticket,
            Err(rejection) => {
                self.emit(ClientEvent::SubmitRejected(rejection));
                return Err(rejection);
            }
        };

        if let Some(message) = self.conversation.messages().last().cloned() {
            self.emit(ClientEvent::MessageAppended(message));
        }
        self.set_pending(true);

        let request = ticket.request;
        let api = self.api.clone();
        let timeout = self.settings.chat_timeout;
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = bounded(api.chat(&ticket.query), timeout, &ticket.cancel).await;
            let _ = completions.send(Completion::Chat {
                request: ticket.request,
                result,
            });
        });
        Ok(request)
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Chat { request, result } => {
                match self.conversation.complete(request, result) {
                    ChatOutcome::Answered(message) => {
                        self.emit(ClientEvent::MessageAppended(message));
                    }
                    ChatOutcome::Failed(failure) => {
                        self.emit(ClientEvent::ChatFailed(failure));
                    }
                    ChatOutcome::Stale => return,
                }
                self.set_pending(false);
            }
            Completion::Upload { upload, result } => {
                match self.uploads.complete_upload(upload, result) {
                    UploadOutcome::Stored(reference) => {
                        self.emit(ClientEvent::UploadStored { upload, reference });
                    }
                    UploadOutcome::Failed { kind, detail } => {
                        self.emit(ClientEvent::UploadFailed {
                            upload,
                            kind,
                            detail,
                        });
                    }
                    UploadOutcome::Superseded(_) | UploadOutcome::Unknown => {}
                }
                self.uploads_tx.send_replace(self.uploads.in_flight());
            }
        }
    }

    // Event goes out before the watch flips so `wait_idle` callers observe it.
    fn set_pending(&mut self, pending: bool) {
        self.emit(ClientEvent::PendingChanged(pending));
        self.pending_tx.send_replace(pending);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.conversation.messages().to_vec(),
            draft: self.conversation.draft().to_string(),
            pending: self.conversation.is_pending(),
            selected_file: self.uploads.selected_file().cloned(),
            upload_reference: self.uploads.current_reference().cloned(),
            uploads_in_flight: self.uploads.in_flight(),
            failures: self.conversation.failures().to_vec(),
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
