//! Client-side interaction core for chatting with a remote assistant about an
//! uploaded document.
//!
//! [`upload::UploadCoordinator`] and [`conversation::ConversationController`]
//! are synchronous state machines. [`session::Session`] owns both, funnels
//! user actions and network completions through one queue, and publishes
//! [`ClientEvent`]s to observers.

use shared::domain::{Message, UploadId, UploadReference};

pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod transport;
pub mod upload;

pub use config::{load_settings, ClientSettings};
pub use conversation::{ChatFailure, ChatOutcome, ConversationController, Phase, SubmitRejection};
pub use error::{ClientError, FailureKind, SessionClosed};
pub use session::{Session, SessionHandle, SessionSnapshot};
pub use transport::{AssistantApi, HttpAssistantApi};
pub use upload::{LocalFile, UploadCoordinator, UploadOutcome};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    FileSelected(LocalFile),
    UploadStarted {
        upload: UploadId,
        file_name: String,
    },
    UploadStored {
        upload: UploadId,
        reference: UploadReference,
    },
    UploadFailed {
        upload: UploadId,
        kind: FailureKind,
        detail: String,
    },
    MessageAppended(Message),
    PendingChanged(bool),
    ChatFailed(ChatFailure),
    SubmitRejected(SubmitRejection),
}
