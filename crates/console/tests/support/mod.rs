//! Mock management API and recording terminal for console tests

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use pvetui_console::{EventStreams, LocalEvents, TerminalControl};
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const USER: &str = "root@pam";
pub const PASSWORD: &str = "secret";
pub const SESSION_TICKET: &str = "PVE:root@pam:65A1B2C3::sig/nature+==";
pub const CSRF_TOKEN: &str = "65A1B2C3:csrf";
pub const VNC_TICKET: &str = "PVEVNC:65A1B2C3::vnc/ticket+==";
pub const GREETING: &[u8] = b"welcome to web01\r\n";

/// What the console WebSocket does after upgrading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleBehavior {
    /// Greets after the handshake, echoes nothing, records everything
    Interactive,
    /// Greets, then closes cleanly
    GreetThenClose,
    /// Closes without sending any output
    CloseImmediately,
    /// Greets, then drops the TCP connection without a close frame
    GreetThenDrop,
}

/// Observations made by the mock server
#[derive(Debug, Default)]
pub struct Recorded {
    pub messages: Vec<Vec<u8>>,
    pub upgrade_headers: Option<HeaderMap>,
    pub ws_query: HashMap<String, String>,
    pub termproxy_calls: usize,
    pub socket_closed: bool,
}

pub struct MockState {
    pub behavior: Mutex<ConsoleBehavior>,
    pub recorded: Mutex<Recorded>,
}

pub struct MockPve {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockPve {
    pub async fn start(behavior: ConsoleBehavior) -> Self {
        let state = Arc::new(MockState {
            behavior: Mutex::new(behavior),
            recorded: Mutex::new(Recorded::default()),
        });

        let router = Router::new()
            .route("/api2/json/access/ticket", post(ticket_handler))
            .route(
                "/api2/json/nodes/:node/:kind/:vmid/termproxy",
                post(termproxy_handler),
            )
            .route(
                "/api2/json/nodes/:node/:kind/:vmid/vncwebsocket",
                get(websocket_handler),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Snapshot of messages received on the console socket
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.state.recorded.lock().messages.clone()
    }

    /// Poll until `check` holds or the timeout passes
    pub async fn wait_for<F>(&self, timeout: Duration, check: F) -> bool
    where
        F: Fn(&Recorded) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check(&self.state.recorded.lock()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[derive(Deserialize)]
struct TicketForm {
    username: String,
    password: String,
}

async fn ticket_handler(Form(form): Form<TicketForm>) -> Response {
    if form.password == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal ticket error").into_response();
    }
    if form.username != USER || form.password != PASSWORD {
        return (StatusCode::UNAUTHORIZED, "authentication failure").into_response();
    }
    Json(serde_json::json!({
        "data": {
            "ticket": SESSION_TICKET,
            "CSRFPreventionToken": CSRF_TOKEN,
            "username": USER,
        }
    }))
    .into_response()
}

fn has_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("PVEAuthCookie={}", SESSION_TICKET))
        .unwrap_or(false)
}

async fn termproxy_handler(
    State(state): State<Arc<MockState>>,
    Path((_node, kind, _vmid)): Path<(String, String, u32)>,
    headers: HeaderMap,
) -> Response {
    state.recorded.lock().termproxy_calls += 1;

    if headers.contains_key("authorization") {
        return (StatusCode::BAD_REQUEST, "token auth not allowed here").into_response();
    }
    if !has_session_cookie(&headers) {
        return (StatusCode::UNAUTHORIZED, "no ticket").into_response();
    }
    if headers.get("CSRFPreventionToken").and_then(|v| v.to_str().ok()) != Some(CSRF_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "bad csrf").into_response();
    }
    if kind != "qemu" && kind != "lxc" {
        return (StatusCode::NOT_FOUND, "no such guest type").into_response();
    }

    Json(serde_json::json!({
        "data": {
            "ticket": VNC_TICKET,
            "port": "5900",
            "user": USER,
            "upid": "UPID:pve1:0000:termproxy:",
        }
    }))
    .into_response()
}

async fn websocket_handler(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !has_session_cookie(&headers) {
        return (StatusCode::UNAUTHORIZED, "no ticket").into_response();
    }
    {
        let mut recorded = state.recorded.lock();
        recorded.upgrade_headers = Some(headers);
        recorded.ws_query = query;
    }
    let behavior = *state.behavior.lock();
    ws.protocols(["binary"])
        .on_upgrade(move |socket| console_session(socket, state, behavior))
}

async fn console_session(mut socket: WebSocket, state: Arc<MockState>, behavior: ConsoleBehavior) {
    if behavior == ConsoleBehavior::CloseImmediately {
        close_and_drain(socket, &state).await;
        return;
    }

    let mut greeted = false;
    while let Some(Ok(message)) = socket.recv().await {
        let Some(payload) = payload_of(message) else {
            break;
        };
        state.recorded.lock().messages.push(payload);

        if !greeted {
            greeted = true;
            if socket.send(Message::Binary(GREETING.to_vec())).await.is_err() {
                break;
            }
            match behavior {
                ConsoleBehavior::GreetThenClose => {
                    close_and_drain(socket, &state).await;
                    return;
                }
                // Dropping the socket ends the connection without a close frame
                ConsoleBehavior::GreetThenDrop => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    state.recorded.lock().socket_closed = true;
                    return;
                }
                _ => {}
            }
        }
    }
    state.recorded.lock().socket_closed = true;
}

/// `None` for a close frame, empty for control frames
fn payload_of(message: Message) -> Option<Vec<u8>> {
    match message {
        Message::Binary(data) => Some(data),
        Message::Text(text) => Some(text.into_bytes()),
        Message::Close(_) => None,
        _ => Some(Vec::new()),
    }
}

/// Send a close frame, then keep reading so nothing is left unread when the
/// connection goes away
async fn close_and_drain(mut socket: WebSocket, state: &MockState) {
    let _ = socket.send(Message::Close(None)).await;
    while let Some(Ok(message)) = socket.recv().await {
        match payload_of(message) {
            Some(payload) if !payload.is_empty() => state.recorded.lock().messages.push(payload),
            Some(_) => {}
            None => break,
        }
    }
    state.recorded.lock().socket_closed = true;
}

/// Calls made against the recording terminal and event sources
#[derive(Debug, Default, Clone)]
pub struct TerminalLog {
    pub raw: bool,
    pub enter_raw: usize,
    pub exit_raw: usize,
    pub clear_screen: usize,
    pub titles: Vec<String>,
    pub reset_title: usize,
    pub show_cursor: usize,
    pub subscribe: usize,
    pub unsubscribe: usize,
}

pub struct MockTerminal {
    pub log: Arc<Mutex<TerminalLog>>,
    pub size: (u16, u16),
}

impl TerminalControl for MockTerminal {
    fn enter_raw(&mut self) -> io::Result<()> {
        let mut log = self.log.lock();
        log.enter_raw += 1;
        log.raw = true;
        Ok(())
    }

    fn exit_raw(&mut self) -> io::Result<()> {
        let mut log = self.log.lock();
        log.exit_raw += 1;
        log.raw = false;
        Ok(())
    }

    fn set_title(&mut self, text: &str) -> io::Result<()> {
        self.log.lock().titles.push(text.to_string());
        Ok(())
    }

    fn reset_title(&mut self) -> io::Result<()> {
        self.log.lock().reset_title += 1;
        Ok(())
    }

    fn clear_screen(&mut self) -> io::Result<()> {
        self.log.lock().clear_screen += 1;
        Ok(())
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        self.log.lock().show_cursor += 1;
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        self.size
    }
}

pub struct MockEvents {
    log: Arc<Mutex<TerminalLog>>,
    streams: Option<EventStreams>,
}

impl LocalEvents for MockEvents {
    fn subscribe(&mut self) -> io::Result<EventStreams> {
        self.log.lock().subscribe += 1;
        self.streams
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already subscribed"))
    }

    fn unsubscribe(&mut self) {
        self.log.lock().unsubscribe += 1;
    }
}

/// Test-side handles for the local terminal
pub struct LocalSide {
    pub log: Arc<Mutex<TerminalLog>>,
    pub input: mpsc::Sender<Vec<u8>>,
    pub resize: mpsc::Sender<(u16, u16)>,
}

pub fn local_terminal(size: (u16, u16)) -> (MockTerminal, MockEvents, LocalSide) {
    let log = Arc::new(Mutex::new(TerminalLog::default()));
    let (input_tx, input) = mpsc::channel(16);
    let (resize_tx, resize) = mpsc::channel(16);

    let terminal = MockTerminal {
        log: log.clone(),
        size,
    };
    let events = MockEvents {
        log: log.clone(),
        streams: Some(EventStreams { input, resize }),
    };
    let side = LocalSide {
        log,
        input: input_tx,
        resize: resize_tx,
    };
    (terminal, events, side)
}
