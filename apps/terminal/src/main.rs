use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings_from, timeout_from_secs, DEFAULT_CONFIG_FILE},
    ClientEvent, HttpAssistantApi, LocalFile, Session, SessionHandle,
};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse_line, render_event, role_label, InputCommand, HELP};

#[derive(Parser, Debug)]
#[command(about = "Chat with an assistant about an uploaded PDF")]
struct Args {
    /// Base URL of the upload/chat service.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Seconds to wait for a chat reply; 0 waits forever.
    #[arg(long)]
    chat_timeout_secs: Option<u64>,
    /// Seconds to wait for an upload; 0 waits forever.
    #[arg(long)]
    upload_timeout_secs: Option<u64>,
    /// Do not send the uploaded file's reference along with chat queries.
    #[arg(long)]
    no_forward_upload: bool,
    /// Accept files other than PDFs for upload.
    #[arg(long)]
    allow_any_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config, |key| std::env::var(key).ok());
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }
    if let Some(secs) = args.chat_timeout_secs {
        settings.chat_timeout = timeout_from_secs(secs);
    }
    if let Some(secs) = args.upload_timeout_secs {
        settings.upload_timeout = timeout_from_secs(secs);
    }
    if args.no_forward_upload {
        settings.forward_upload_reference = false;
    }

    let api = HttpAssistantApi::new(&settings.server_url)
        .with_context(|| format!("cannot use server url '{}'", settings.server_url))?;
    info!(server = %settings.server_url, "starting docchat");
    let session = Session::spawn(Arc::new(api), settings);

    let printer = tokio::spawn(print_events(session.subscribe_events()));
    println!("Upload a PDF with /upload <path> or start a conversation. /help lists commands.");

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_line(&line) {
            InputCommand::Submit(text) => submit(&session, text).await?,
            InputCommand::Upload(path) => {
                let file = LocalFile::from_path(&path);
                if !args.allow_any_file && !file.is_pdf() {
                    println!("[only PDF documents can be uploaded; use --allow-any-file to override]");
                    continue;
                }
                session.upload(file).await?;
            }
            InputCommand::Cancel => session.cancel_chat().await?,
            InputCommand::CancelUploads => session.cancel_uploads().await?,
            InputCommand::Log => print_log(&session).await?,
            InputCommand::Help => println!("{HELP}"),
            InputCommand::Quit => break,
            InputCommand::Invalid(reason) => println!("[{reason}]"),
        }
    }

    drop(session);
    let _ = printer.await;
    Ok(())
}

async fn submit(session: &SessionHandle, text: String) -> Result<()> {
    match session.send_text(text).await? {
        Ok(request) => info!(request = %request, "message sent"),
        Err(rejection) => debug!(%rejection, "message not sent"),
    }
    Ok(())
}

async fn print_log(session: &SessionHandle) -> Result<()> {
    let snapshot = session.snapshot().await?;
    if snapshot.messages.is_empty() {
        println!("[no messages yet]");
    }
    for message in &snapshot.messages {
        println!("#{} {}> {}", message.id, role_label(message.role), message.content);
    }
    if let Some(reference) = &snapshot.upload_reference {
        println!("[active upload: {reference}]");
    }
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
