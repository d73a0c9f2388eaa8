use super::*;

use std::{
    collections::{HashMap, VecDeque},
    env, fs,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use shared::{domain::Role, protocol::ChatQuery};
use tokio::{net::TcpListener, sync::Mutex};

use crate::{error::FailureKind, transport::HttpAssistantApi};

type ChatResult = Result<ChatResponse, ClientError>;

/// Chat calls block until the test releases the matching gate; a call with no
/// gate registered never completes.
#[derive(Default)]
struct GatedApi {
    chat_queries: Mutex<Vec<ChatQuery>>,
    gates: Mutex<VecDeque<oneshot::Receiver<ChatResult>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    upload_results: Mutex<VecDeque<Result<UploadReference, ClientError>>>,
}

impl GatedApi {
    async fn gate(&self) -> oneshot::Sender<ChatResult> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().await.push_back(rx);
        tx
    }

    async fn queue_upload(&self, result: Result<UploadReference, ClientError>) {
        self.upload_results.lock().await.push_back(result);
    }

    async fn chat_count(&self) -> usize {
        self.chat_queries.lock().await.len()
    }
}

#[async_trait]
impl AssistantApi for GatedApi {
    async fn upload(&self, _file: &LocalFile) -> Result<UploadReference, ClientError> {
        self.upload_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| {
                Err(ClientError::Status {
                    status: 503,
                    message: None,
                })
            })
    }

    async fn chat(&self, query: &ChatQuery) -> Result<ChatResponse, ClientError> {
        self.chat_queries.lock().await.push(query.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let gate = self.gates.lock().await.pop_front();
        let result = match gate {
            Some(rx) => rx.await.unwrap_or(Err(ClientError::Cancelled)),
            None => std::future::pending().await,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn answer(text: &str) -> ChatResult {
    Ok(ChatResponse {
        message: Some(text.to_string()),
    })
}

fn untimed_settings() -> ClientSettings {
    ClientSettings {
        chat_timeout: None,
        upload_timeout: None,
        ..ClientSettings::default()
    }
}

fn log_of(snapshot: &SessionSnapshot) -> Vec<(Role, String)> {
    snapshot
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect()
}

fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn successful_round_trip_emits_ordered_events() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());
    let mut events = session.subscribe_events();

    let gate = api.gate().await;
    let request = session
        .send_text("Hello")
        .await
        .expect("session")
        .expect("accepted");
    assert!(session.is_pending());

    gate.send(answer("Hi there")).expect("release");
    session.wait_idle().await.expect("idle");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        log_of(&snapshot),
        vec![
            (Role::User, "Hello".to_string()),
            (Role::Assistant, "Hi there".to_string())
        ]
    );
    assert_eq!(snapshot.draft, "");
    assert!(!snapshot.pending);

    let queries = api.chat_queries.lock().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].query, "Hello");
    assert_eq!(queries[0].uploaded_file_url, None);
    drop(queries);

    let events = drain(&mut events);
    assert!(matches!(&events[0], ClientEvent::MessageAppended(m) if m.role == Role::User));
    assert!(matches!(events[1], ClientEvent::PendingChanged(true)));
    assert!(matches!(&events[2], ClientEvent::MessageAppended(m) if m.role == Role::Assistant));
    assert!(matches!(events[3], ClientEvent::PendingChanged(false)));
    assert_eq!(events.len(), 4);
    assert_eq!(request, ChatRequestId(1));
}

#[tokio::test]
async fn submit_while_pending_is_rejected_without_second_request() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());

    let gate = api.gate().await;
    session
        .send_text("first")
        .await
        .expect("session")
        .expect("accepted");

    let rejection = session
        .send_text("second")
        .await
        .expect("session")
        .expect_err("guarded");
    assert_eq!(rejection, SubmitRejection::Pending);

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(log_of(&snapshot), vec![(Role::User, "first".to_string())]);
    assert_eq!(snapshot.draft, "second");

    gate.send(answer("done")).expect("release");
    session.wait_idle().await.expect("idle");
    assert_eq!(api.chat_count().await, 1);
}

#[tokio::test]
async fn chat_requests_never_overlap() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());

    for round in 0..5 {
        let gate = api.gate().await;
        session
            .send_text(format!("question {round}"))
            .await
            .expect("session")
            .expect("accepted");
        let _ = session.send_text("interrupt").await.expect("session");
        gate.send(answer("ok")).expect("release");
        session.wait_idle().await.expect("idle");
    }

    assert_eq!(api.chat_count().await, 5);
    assert_eq!(api.max_active.load(Ordering::SeqCst), 1);

    let snapshot = session.snapshot().await.expect("snapshot");
    let roles: Vec<Role> = snapshot.messages.iter().map(|m| m.role).collect();
    for pair in roles.chunks(2) {
        assert_eq!(pair, [Role::User, Role::Assistant]);
    }
}

#[tokio::test]
async fn blank_submit_issues_nothing_and_keeps_draft() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());
    let mut events = session.subscribe_events();

    let rejection = session
        .send_text("   ")
        .await
        .expect("session")
        .expect_err("rejected");
    assert_eq!(rejection, SubmitRejection::Empty);

    let snapshot = session.snapshot().await.expect("snapshot");
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.draft, "   ");
    assert!(!snapshot.pending);
    assert_eq!(api.chat_count().await, 0);

    let events = drain(&mut events);
    assert!(matches!(
        events.as_slice(),
        [ClientEvent::SubmitRejected(SubmitRejection::Empty)]
    ));
}

#[tokio::test]
async fn failed_chat_leaves_user_message_and_reports_failure() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());
    let mut events = session.subscribe_events();

    let gate = api.gate().await;
    session
        .send_text("Hello")
        .await
        .expect("session")
        .expect("accepted");
    gate.send(Err(ClientError::Status {
        status: 500,
        message: None,
    }))
    .expect("release");
    session.wait_idle().await.expect("idle");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(log_of(&snapshot), vec![(Role::User, "Hello".to_string())]);
    assert!(!snapshot.pending);
    assert_eq!(snapshot.failures.len(), 1);
    assert_eq!(snapshot.failures[0].kind, FailureKind::NonSuccessStatus);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(
        event,
        ClientEvent::ChatFailed(failure) if failure.kind == FailureKind::NonSuccessStatus
    )));
}

#[tokio::test]
async fn hung_chat_times_out_and_clears_pending() {
    let api = Arc::new(GatedApi::default());
    let settings = ClientSettings {
        chat_timeout: Some(Duration::from_millis(30)),
        ..ClientSettings::default()
    };
    let session = Session::spawn(api.clone(), settings);

    session
        .send_text("anyone there?")
        .await
        .expect("session")
        .expect("accepted");
    tokio::time::timeout(Duration::from_secs(5), session.wait_idle())
        .await
        .expect("timeout must clear pending")
        .expect("idle");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.failures[0].kind, FailureKind::Timeout);
    assert_eq!(snapshot.messages.len(), 1);
}

#[tokio::test]
async fn cancelled_chat_clears_pending() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());

    session
        .send_text("never mind")
        .await
        .expect("session")
        .expect("accepted");
    session.cancel_chat().await.expect("cancel");
    tokio::time::timeout(Duration::from_secs(5), session.wait_idle())
        .await
        .expect("cancel must clear pending")
        .expect("idle");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.failures[0].kind, FailureKind::Cancelled);

    // The session accepts new input afterwards.
    let gate = api.gate().await;
    session
        .send_text("again")
        .await
        .expect("session")
        .expect("accepted");
    gate.send(answer("back")).expect("release");
    session.wait_idle().await.expect("idle");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.messages.len(), 3);
}

#[tokio::test]
async fn upload_reference_survives_failed_upload_and_enables_blank_submit() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());
    let mut events = session.subscribe_events();

    api.queue_upload(Ok(UploadReference::new("https://store/abc")))
        .await;
    session
        .upload(LocalFile::from_path("/tmp/a.pdf"))
        .await
        .expect("upload");
    session.wait_uploads().await.expect("uploads");

    api.queue_upload(Err(ClientError::Status {
        status: 500,
        message: Some("disk full".into()),
    }))
    .await;
    session
        .upload(LocalFile::from_path("/tmp/b.pdf"))
        .await
        .expect("upload");
    session.wait_uploads().await.expect("uploads");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        snapshot.upload_reference.as_ref().map(UploadReference::as_str),
        Some("https://store/abc")
    );
    assert_eq!(
        snapshot.selected_file.as_ref().map(|f| f.file_name.as_str()),
        Some("b.pdf")
    );

    let events = drain(&mut events);
    assert!(events
        .iter()
        .any(|event| matches!(event, ClientEvent::UploadStored { .. })));
    assert!(events.iter().any(|event| matches!(
        event,
        ClientEvent::UploadFailed {
            kind: FailureKind::NonSuccessStatus,
            ..
        }
    )));

    let gate = api.gate().await;
    session
        .send_text("")
        .await
        .expect("session")
        .expect("blank submit allowed with upload");
    gate.send(answer("summary")).expect("release");
    session.wait_idle().await.expect("idle");

    let queries = api.chat_queries.lock().await;
    assert_eq!(queries[0].query, "");
    assert_eq!(
        queries[0].uploaded_file_url.as_deref(),
        Some("https://store/abc")
    );
}

#[tokio::test]
async fn session_stops_when_handles_are_dropped() {
    let api = Arc::new(GatedApi::default());
    let session = Session::spawn(api.clone(), untimed_settings());
    let mut events = session.subscribe_events();
    drop(session);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Err(broadcast::error::RecvError::Closed) => break,
                _ => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "worker should exit and close the event channel");
}

// End-to-end against a mock HTTP collaborator.

#[derive(Clone, Default)]
struct MockServer {
    uploads: Arc<AtomicUsize>,
    chat_params: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn mock_chat(
    State(state): State<MockServer>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let reply = match params.get("query").map(String::as_str) {
        Some("Hello") => "Hi there".to_string(),
        Some(other) => format!("you said {other}"),
        None => String::new(),
    };
    state.chat_params.lock().await.push(params);
    Json(json!({ "message": reply }))
}

async fn mock_upload(State(state): State<MockServer>, mut multipart: Multipart) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        let _ = field.bytes().await;
    }
    if state.uploads.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!({ "fileUrl": "https://store/abc" })).into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "storage offline" })),
        )
            .into_response()
    }
}

async fn spawn_mock_server() -> (String, MockServer) {
    env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = MockServer::default();
    let app = Router::new()
        .route("/chat", get(mock_chat))
        .route("/upload", post(mock_upload))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn http_hello_scenario() {
    let (server_url, server) = spawn_mock_server().await;
    let api = Arc::new(HttpAssistantApi::new(&server_url).expect("api"));
    let session = Session::spawn(api, untimed_settings());

    session
        .send_text("Hello")
        .await
        .expect("session")
        .expect("accepted");
    session.wait_idle().await.expect("idle");

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        log_of(&snapshot),
        vec![
            (Role::User, "Hello".to_string()),
            (Role::Assistant, "Hi there".to_string())
        ]
    );
    let params = server.chat_params.lock().await;
    assert_eq!(params[0]["query"], "Hello");
}

#[tokio::test]
async fn http_upload_scenario_keeps_reference_after_failure() {
    let (server_url, server) = spawn_mock_server().await;
    let api = Arc::new(HttpAssistantApi::new(&server_url).expect("api"));
    let session = Session::spawn(api, untimed_settings());

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("docchat_session_test_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("doc.pdf");
    fs::write(&path, b"%PDF-1.4").expect("write");

    session
        .upload(LocalFile::from_path(&path))
        .await
        .expect("upload");
    session.wait_uploads().await.expect("uploads");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        snapshot.upload_reference.as_ref().map(UploadReference::as_str),
        Some("https://store/abc")
    );

    session
        .upload(LocalFile::from_path(&path))
        .await
        .expect("upload");
    session.wait_uploads().await.expect("uploads");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(
        snapshot.upload_reference.as_ref().map(UploadReference::as_str),
        Some("https://store/abc")
    );
    assert_eq!(server.uploads.load(Ordering::SeqCst), 2);

    session
        .send_text("what is this?")
        .await
        .expect("session")
        .expect("accepted");
    session.wait_idle().await.expect("idle");
    let params = server.chat_params.lock().await;
    assert_eq!(params[0]["uploadedFileUrl"], "https://store/abc");

    fs::remove_dir_all(dir).expect("cleanup");
}
