//! Line input parsing and event rendering for the terminal front end.

use std::path::PathBuf;

use client_core::{ClientEvent, SubmitRejection};
use shared::domain::Role;

pub const HELP: &str = "\
commands:
  /upload <path>   pick a PDF and upload it
  /cancel          abort the pending reply
  /cancel-uploads  abort uploads in progress
  /log             print the conversation so far
  /help            show this help
  /quit            exit
anything else is sent as a message; start a line with // to send a literal '/'";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Submit(String),
    Upload(PathBuf),
    Cancel,
    CancelUploads,
    Log,
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_line(line: &str) -> InputCommand {
    if let Some(escaped) = line.strip_prefix("//") {
        return InputCommand::Submit(format!("/{escaped}"));
    }
    let Some(command) = line.trim().strip_prefix('/') else {
        return InputCommand::Submit(line.to_string());
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "upload" if rest.is_empty() => InputCommand::Invalid("/upload needs a file path".into()),
        "upload" => InputCommand::Upload(PathBuf::from(rest)),
        "cancel" => InputCommand::Cancel,
        "cancel-uploads" => InputCommand::CancelUploads,
        "log" => InputCommand::Log,
        "help" | "?" => InputCommand::Help,
        "quit" | "exit" => InputCommand::Quit,
        other => InputCommand::Invalid(format!("unknown command /{other}; try /help")),
    }
}

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

/// Text to show for an event, if any.
pub fn render_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::FileSelected(file) => Some(format!("[selected: {}]", file.file_name)),
        ClientEvent::UploadStarted { file_name, .. } => Some(format!("[uploading {file_name}...]")),
        ClientEvent::UploadStored { reference, .. } => Some(format!("[uploaded: {reference}]")),
        ClientEvent::UploadFailed { kind, detail, .. } => {
            Some(format!("[upload failed ({kind}): {detail}]"))
        }
        ClientEvent::MessageAppended(message) if message.role == Role::Assistant => Some(format!(
            "{}> {}",
            role_label(message.role),
            message.content
        )),
        ClientEvent::MessageAppended(_) => None,
        ClientEvent::PendingChanged(true) => Some("[assistant is thinking...]".into()),
        ClientEvent::PendingChanged(false) => None,
        ClientEvent::ChatFailed(failure) => Some(format!(
            "[no reply ({}): {}]",
            failure.kind, failure.detail
        )),
        ClientEvent::SubmitRejected(SubmitRejection::Empty) => None,
        ClientEvent::SubmitRejected(rejection) => Some(format!("[not sent: {rejection}]")),
    }
}
