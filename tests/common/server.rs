//! Fake hospital backend lifecycle management
//!
//! Serves the notification REST endpoints and the push channel from an
//! in-memory record list. Each test gets an isolated backend on a random
//! port.

#![allow(dead_code)]

use super::constants::*;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use hms_notifications::api::HttpNotificationsApi;
use hms_notifications::config::{AppConfig, CliConfig, FileConfig, ReconnectConfig};
use hms_notifications::realtime::messages::{msg_types, system, ClientMessage, ServerMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

struct BackendState {
    /// Newest first, in the backend's wire shape.
    records: Mutex<Vec<Value>>,
    fetch_requests: AtomicUsize,
    mutation_requests: AtomicUsize,
    total_connections: AtomicUsize,
    rejected_handshakes: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    fail_mutations: AtomicBool,
    fail_fetch: AtomicBool,
    fetch_delay_ms: AtomicU64,
    push_tx: broadcast::Sender<ServerMessage>,
    kick_tx: broadcast::Sender<()>,
}

/// Fake backend instance.
///
/// When dropped, the server shuts down.
pub struct TestBackend {
    /// REST base URL (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Push channel URL (e.g., "ws://127.0.0.1:12345/ws")
    pub ws_url: String,

    /// The port the backend is listening on
    pub port: u16,

    state: Arc<BackendState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestBackend {
    /// Spawns a backend seeded with three notifications, two of them unread.
    pub async fn spawn() -> Self {
        let backend = Self::spawn_empty().await;
        {
            let mut records = backend.state.records.lock().unwrap();
            records.push(record_json(
                LAB_RESULT_ID,
                "Lab results available",
                "CBC panel for bed 12 is ready",
                false,
            ));
            records.push(record_json(
                APPOINTMENT_ID,
                "Appointment rescheduled",
                "Cardiology follow-up moved to 14:30",
                false,
            ));
            records.push(record_json(
                INVOICE_ID,
                "Invoice paid",
                "Invoice INV-2207 settled",
                true,
            ));
        }
        backend
    }

    /// Spawns a backend with no notifications.
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the backend doesn't become ready
    /// within timeout.
    pub async fn spawn_empty() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(4);
        let state = Arc::new(BackendState {
            records: Mutex::new(Vec::new()),
            fetch_requests: AtomicUsize::new(0),
            mutation_requests: AtomicUsize::new(0),
            total_connections: AtomicUsize::new(0),
            rejected_handshakes: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            fail_mutations: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fetch_delay_ms: AtomicU64::new(0),
            push_tx,
            kick_tx,
        });

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/notifications", get(list_notifications))
            .route("/notifications/read-all", post(mark_all_read))
            .route("/notifications/clear-all", delete(clear_all))
            .route("/notifications/{id}/read", post(mark_read))
            .route("/notifications/{id}", delete(delete_one))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let backend = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            ws_url: format!("ws://127.0.0.1:{}/ws", port),
            port,
            state,
            _shutdown_tx: Some(shutdown_tx),
        };
        backend.wait_for_ready().await;
        backend
    }

    /// A REST client authenticated as the test user.
    pub fn api(&self) -> HttpNotificationsApi {
        self.api_with_token(TEST_TOKEN)
    }

    pub fn api_with_token(&self, token: &str) -> HttpNotificationsApi {
        HttpNotificationsApi::new(
            self.base_url.clone(),
            token.to_string(),
            TEST_USER_ID.to_string(),
            5,
        )
    }

    /// Resolved configuration pointing at this backend, with a short fixed
    /// reconnect delay.
    pub fn app_config(&self) -> AppConfig {
        let cli = CliConfig {
            api_base_url: Some(self.base_url.clone()),
            token: Some(TEST_TOKEN.to_string()),
            user_id: Some(TEST_USER_ID.to_string()),
            sound_enabled: false,
            ..Default::default()
        };
        let file = FileConfig {
            reconnect: Some(ReconnectConfig {
                initial_delay_ms: Some(50),
                max_delay_ms: Some(50),
                multiplier: Some(1.0),
                jitter: Some(0.0),
                max_attempts: None,
            }),
            ..Default::default()
        };
        AppConfig::resolve(&cli, Some(file)).expect("Failed to resolve test config")
    }

    // ========================================================================
    // Backend state
    // ========================================================================

    /// Adds a notification as the newest record.
    pub fn insert(&self, id: &str, title: &str) {
        self.state
            .records
            .lock()
            .unwrap()
            .insert(0, record_json(id, title, "", false));
    }

    /// Adds a record in the backend's wire shape as the newest record.
    pub fn insert_raw(&self, record: Value) {
        self.state.records.lock().unwrap().insert(0, record);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r["id"] == id)
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.state
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r["id"] == id && !r["read_at"].is_null())
    }

    pub fn len(&self) -> usize {
        self.state.records.lock().unwrap().len()
    }

    pub fn set_fail_mutations(&self, fail: bool) {
        self.state.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Makes every listing request answer 503.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.state.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Delay applied to every listing request.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state
            .fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fetch_requests(&self) -> usize {
        self.state.fetch_requests.load(Ordering::SeqCst)
    }

    pub fn mutation_requests(&self) -> usize {
        self.state.mutation_requests.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Push channel
    // ========================================================================

    /// Pushes a notification to every subscriber of the test user's
    /// channel. Returns how many received it.
    pub fn push(&self, payload: Value) -> usize {
        self.state
            .push_tx
            .send(ServerMessage::new(msg_types::NOTIFICATION, payload))
            .unwrap_or(0)
    }

    /// Live subscriptions to the test user's channel.
    pub fn subscribers(&self) -> usize {
        self.state.push_tx.receiver_count()
    }

    /// Closes every open push connection from the server side.
    pub fn kick_all(&self) {
        let _ = self.state.kick_tx.send(());
    }

    pub fn total_connections(&self) -> usize {
        self.state.total_connections.load(Ordering::SeqCst)
    }

    pub fn rejected_handshakes(&self) -> usize {
        self.state.rejected_handshakes.load(Ordering::SeqCst)
    }

    /// Every channel name a client asked for, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Backend did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.kick_all();
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if it doesn't hold within [`CONDITION_TIMEOUT_MS`].
pub async fn wait_until(condition: impl Fn() -> bool, what: &str) {
    let start = std::time::Instant::now();
    while !condition() {
        if start.elapsed() > Duration::from_millis(CONDITION_TIMEOUT_MS) {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn record_json(id: &str, title: &str, message: &str, read: bool) -> Value {
    let now = chrono::Utc::now().to_rfc3339();
    json!({
        "id": id,
        "data": {
            "title": title,
            "message": message,
            "type": "clinical",
            "priority": "normal"
        },
        "read_at": if read { json!(now) } else { Value::Null },
        "created_at": now
    })
}

// ============================================================================
// REST handlers
// ============================================================================

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", TEST_TOKEN);
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "status": false, "message": "Unauthenticated." })),
    )
        .into_response()
}

fn ack() -> Response {
    Json(json!({ "status": true, "message": "ok" })).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": false, "message": "Notification not found" })),
    )
        .into_response()
}

impl BackendState {
    /// Counts a mutation and returns the scripted failure, if any.
    fn mutation_failure(&self) -> Option<Response> {
        self.mutation_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutations.load(Ordering::SeqCst) {
            Some(
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "status": false, "message": "database unavailable" })),
                )
                    .into_response(),
            )
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    #[serde(rename = "perPage")]
    per_page: Option<u32>,
}

async fn list_notifications(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.fetch_requests.fetch_add(1, Ordering::SeqCst);

    let delay = state.fetch_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.fail_fetch.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": false, "message": "maintenance" })),
        )
            .into_response();
    }

    let records = state.records.lock().unwrap().clone();
    let page = query.page.unwrap_or(1).max(1) as usize;
    let per_page = query.per_page.unwrap_or(20).max(1) as usize;
    let total = records.len();
    let last_page = total.div_ceil(per_page).max(1);
    let data: Vec<Value> = records
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();
    let unread = records.iter().filter(|r| r["read_at"].is_null()).count();

    Json(json!({
        "status": true,
        "data": {
            "current_page": page,
            "data": data,
            "last_page": last_page,
            "total": total
        },
        "unread_count": unread,
        "stats": { "total": total, "unread": unread }
    }))
    .into_response()
}

async fn mark_read(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if let Some(failure) = state.mutation_failure() {
        return failure;
    }
    let mut records = state.records.lock().unwrap();
    match records.iter_mut().find(|r| r["id"] == id.as_str()) {
        Some(record) => {
            if record["read_at"].is_null() {
                record["read_at"] = json!(chrono::Utc::now().to_rfc3339());
            }
            ack()
        }
        None => not_found(),
    }
}

async fn mark_all_read(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if let Some(failure) = state.mutation_failure() {
        return failure;
    }
    let now = chrono::Utc::now().to_rfc3339();
    for record in state.records.lock().unwrap().iter_mut() {
        if record["read_at"].is_null() {
            record["read_at"] = json!(now);
        }
    }
    ack()
}

async fn delete_one(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if let Some(failure) = state.mutation_failure() {
        return failure;
    }
    let mut records = state.records.lock().unwrap();
    let before = records.len();
    records.retain(|r| r["id"] != id.as_str());
    if records.len() == before {
        not_found()
    } else {
        ack()
    }
}

async fn clear_all(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if let Some(failure) = state.mutation_failure() {
        return failure;
    }
    state.records.lock().unwrap().clear();
    ack()
}

// ============================================================================
// Push channel
// ============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<BackendState>>,
) -> Response {
    if !authorized(&headers) {
        state.rejected_handshakes.fetch_add(1, Ordering::SeqCst);
        return unauthorized();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    state.total_connections.fetch_add(1, Ordering::SeqCst);
    let mut kick_rx = state.kick_tx.subscribe();
    let (mut sink, mut stream) = socket.split();

    let connected = ServerMessage::new(msg_types::CONNECTED, json!({}));
    if send_message(&mut sink, &connected).await.is_err() {
        return;
    }

    // The client must subscribe before anything is delivered.
    let channel = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) if msg.msg_type == msg_types::SUBSCRIBE => {
                    match serde_json::from_value::<system::Subscribe>(msg.payload) {
                        Ok(subscribe) => break subscribe.channel,
                        Err(_) => return,
                    }
                }
                _ => continue,
            },
            Some(Ok(_)) => continue,
            _ => return,
        }
    };
    state.subscriptions.lock().unwrap().push(channel.clone());

    if channel != TEST_CHANNEL {
        let error = ServerMessage::new(
            msg_types::ERROR,
            system::Error {
                code: "forbidden".to_string(),
                message: format!("cannot subscribe to {}", channel),
            },
        );
        let _ = send_message(&mut sink, &error).await;
        return;
    }

    let mut push_rx = state.push_tx.subscribe();
    let subscribed = ServerMessage::new(msg_types::SUBSCRIBED, system::Subscribed { channel });
    if send_message(&mut sink, &subscribed).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            pushed = push_rx.recv() => match pushed {
                Ok(msg) => {
                    if send_message(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let is_ping = serde_json::from_str::<ClientMessage>(&text)
                        .map(|msg| msg.msg_type == msg_types::PING)
                        .unwrap_or(false);
                    if is_ping {
                        let pong = ServerMessage::new(msg_types::PONG, Value::Null);
                        if send_message(&mut sink, &pong).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = kick_rx.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
