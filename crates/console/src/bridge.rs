//! Interactive console bridge
//!
//! Pumps bytes between the local terminal and a remote console WebSocket.
//! One bridge owns stdin, the resize subscription and the socket for the
//! whole session, and resolves exactly once.
//!
//! Lifecycle: `Idle -> Connecting -> Streaming -> Closing -> {Closed | Failed}`,
//! plus `Connecting -> Failed` (timeout or handshake error) and
//! `Streaming -> Failed` (socket error mid-session). Entering a terminal
//! state runs cleanup.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use pvetui_common::{ConnectionDescriptor, Error};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::api::error_chain;
use crate::classify::{classify, ClassifiedError, ErrorCategory};
use crate::events::{EventStreams, LocalEvents};
use crate::frame::OutboundFrame;
use crate::terminal::TerminalControl;

/// Bound on reaching "open"
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the second resize, letting the remote pty initialize
pub const RESIZE_SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Ctrl+\ detaches locally and is never forwarded
pub const DETACH_KEY: u8 = 0x1C;

const SUBPROTOCOL: &str = "binary";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Stop reading the socket while this much output awaits the terminal
const MAX_PENDING_OUTPUT: usize = 1 << 20;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bridge lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Connecting,
    Streaming,
    Closing,
    Closed,
    Failed,
}

impl BridgeState {
    /// Whether the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Closed | BridgeState::Failed)
    }

    fn can_transition_to(&self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Streaming)
                | (Connecting, Failed)
                | (Streaming, Closing)
                | (Streaming, Failed)
                | (Closing, Closed)
                | (Closing, Failed)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Idle => write!(f, "idle"),
            BridgeState::Connecting => write!(f, "connecting"),
            BridgeState::Streaming => write!(f, "streaming"),
            BridgeState::Closing => write!(f, "closing"),
            BridgeState::Closed => write!(f, "closed"),
            BridgeState::Failed => write!(f, "failed"),
        }
    }
}

/// Bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub connect_timeout: Duration,
    pub settle_delay: Duration,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            settle_delay: RESIZE_SETTLE_DELAY,
            insecure: false,
        }
    }
}

/// Why a console session failed
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Timed out after {}s waiting for the console to open", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("The console closed the connection before it opened")]
    ClosedBeforeOpen,

    /// The protocol has no explicit ticket rejection. A socket that closes
    /// right after opening without sending a byte is assumed to have
    /// rejected the handshake.
    #[error("The console closed without output; the console ticket was probably rejected. Log in again and retry.")]
    TicketRejected,

    #[error("{0}")]
    Connect(ClassifiedError),

    #[error("Console connection lost: {0}")]
    Stream(ClassifiedError),

    #[error("Local terminal error: {0}")]
    Terminal(#[from] io::Error),

    #[error(transparent)]
    State(#[from] Error),
}

impl BridgeError {
    /// User-facing category
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::Timeout(_) => ErrorCategory::Timeout,
            BridgeError::TicketRejected => ErrorCategory::AuthenticationFailed,
            BridgeError::Connect(classified) | BridgeError::Stream(classified) => {
                classified.category
            }
            BridgeError::ClosedBeforeOpen | BridgeError::Terminal(_) | BridgeError::State(_) => {
                ErrorCategory::Unknown
            }
        }
    }
}

/// How a streaming session ended without an error
enum SessionEnd {
    Detached,
    RemoteClosed,
}

/// Console bridge for one session
pub struct TerminalBridge<T, E, W>
where
    T: TerminalControl,
    E: LocalEvents,
    W: AsyncWrite + Unpin + Send,
{
    terminal: T,
    events: E,
    output: W,
    options: BridgeOptions,
    state: BridgeState,
    subscribed: bool,
    cleaned_up: bool,
}

impl<T, E, W> TerminalBridge<T, E, W>
where
    T: TerminalControl,
    E: LocalEvents,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(terminal: T, events: E, output: W, options: BridgeOptions) -> Self {
        Self {
            terminal,
            events,
            output,
            options,
            state: BridgeState::Idle,
            subscribed: false,
            cleaned_up: false,
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok` when the user detached or the remote closed cleanly.
    pub async fn run(mut self, descriptor: &ConnectionDescriptor) -> Result<(), BridgeError> {
        debug!("Opening console {:?}", descriptor);
        self.transition(BridgeState::Connecting)?;

        let result = self.drive(descriptor).await;
        let next = if result.is_ok() {
            BridgeState::Closed
        } else {
            BridgeState::Failed
        };

        if let Err(e) = self.transition(next) {
            self.cleanup();
            return Err(e.into());
        }
        result
    }

    /// Single place where the state changes
    fn transition(&mut self, next: BridgeState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Console bridge {} -> {}", self.state, next);
        self.state = next;
        if next.is_terminal() {
            self.cleanup();
        }
        Ok(())
    }

    /// Restore the local terminal. Runs at most once; timers and the socket
    /// are owned by `drive` and already dropped by the time this runs.
    fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        if self.subscribed {
            self.events.unsubscribe();
            self.subscribed = false;
        }
        if let Err(e) = self.terminal.exit_raw() {
            warn!("Failed to restore terminal mode: {}", e);
        }
        if let Err(e) = self.terminal.show_cursor() {
            warn!("Failed to show cursor: {}", e);
        }
        if let Err(e) = self.terminal.reset_title() {
            warn!("Failed to reset terminal title: {}", e);
        }
        debug!("Console bridge cleaned up");
    }

    async fn drive(&mut self, descriptor: &ConnectionDescriptor) -> Result<(), BridgeError> {
        let request = build_request(descriptor)?;
        let connector = tls_connector(self.options.insecure)?;
        let connect = tokio_tungstenite::connect_async_tls_with_config(
            request, None, false, connector,
        );

        // Dropping the pending connect aborts the socket
        let socket = match tokio::time::timeout(self.options.connect_timeout, connect).await {
            Err(_) => {
                warn!(
                    "Console did not open within {:?}",
                    self.options.connect_timeout
                );
                return Err(BridgeError::Timeout(self.options.connect_timeout));
            }
            Ok(Err(e)) => return Err(connect_error(e)),
            Ok(Ok((socket, _response))) => socket,
        };

        self.transition(BridgeState::Streaming)?;
        self.stream(socket, descriptor).await
    }

    async fn stream(
        &mut self,
        socket: WsStream,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(), BridgeError> {
        let (sink, mut source) = socket.split();

        self.terminal.enter_raw()?;
        self.terminal.clear_screen()?;
        self.terminal
            .set_title(&format!("{} - Ctrl+\\ to detach", descriptor.title_hint))?;

        // Socket sends run on their own task so a stalled socket never holds
        // up local input. Frames keep their queue order.
        let (outbound, writer) = spawn_socket_writer(sink);
        let mut writer = WriterTask(writer);

        // Nothing input-derived may precede the handshake, so local events
        // are only attached after it is queued
        queue(&outbound, Message::Binary(descriptor.handshake().into_bytes()));

        let EventStreams {
            mut input,
            mut resize,
        } = self.events.subscribe()?;
        self.subscribed = true;

        let (cols, rows) = self.terminal.size();
        queue_frame(&outbound, OutboundFrame::Resize { cols, rows });

        let settle = tokio::time::sleep(self.options.settle_delay);
        tokio::pin!(settle);
        let mut settled = false;
        let mut resize_open = true;
        let mut received: u64 = 0;

        // Console output waiting for the local terminal. Written by the
        // select loop one cancel-safe `write` at a time.
        let mut pending: Vec<u8> = Vec::new();
        let mut unflushed = false;

        let end = loop {
            tokio::select! {
                chunk = input.recv() => match chunk {
                    Some(chunk) if chunk == [DETACH_KEY] => break SessionEnd::Detached,
                    Some(chunk) => queue_frame(&outbound, OutboundFrame::Data(chunk)),
                    None => {
                        debug!("Local input closed");
                        break SessionEnd::Detached;
                    }
                },
                stopped = &mut writer.0 => return Err(writer_stopped(stopped)),
                message = source.next(), if pending.len() < MAX_PENDING_OUTPUT => match message {
                    Some(Ok(Message::Binary(data))) => {
                        received += data.len() as u64;
                        trace!("console -> local: {} bytes", data.len());
                        pending.extend_from_slice(&data);
                    }
                    Some(Ok(Message::Text(text))) => {
                        received += text.len() as u64;
                        trace!("console -> local: {} bytes", text.len());
                        pending.extend_from_slice(text.as_bytes());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Console closed by server: {:?}", frame);
                        break SessionEnd::RemoteClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        break SessionEnd::RemoteClosed;
                    }
                    Some(Err(e)) => {
                        return Err(BridgeError::Stream(classify(&error_chain(&e))));
                    }
                },
                drained = drain_output(&mut self.output, &pending), if !pending.is_empty() || unflushed => {
                    match drained? {
                        Drained::Wrote(n) => {
                            pending.drain(..n);
                            unflushed = true;
                        }
                        Drained::Flushed => unflushed = false,
                    }
                },
                size = resize.recv(), if resize_open => match size {
                    Some((cols, rows)) => queue_frame(&outbound, OutboundFrame::Resize { cols, rows }),
                    None => resize_open = false,
                },
                _ = &mut settle, if !settled => {
                    settled = true;
                    let (cols, rows) = self.terminal.size();
                    queue_frame(&outbound, OutboundFrame::Resize { cols, rows });
                }
            }
        };

        self.transition(BridgeState::Closing)?;

        match end {
            SessionEnd::Detached => {
                debug!("Detaching from console");
                // Unwritten output is dropped. Closing the queue makes the
                // writer send a close frame; no wait for the server's reply.
                drop(outbound);
                match tokio::time::timeout(CLOSE_TIMEOUT, &mut writer.0).await {
                    Ok(Ok(Err(e))) => debug!("Error closing console socket: {}", e),
                    Ok(Err(e)) => debug!("Console writer task failed: {}", e),
                    Err(_) => debug!("Timed out sending close frame"),
                    Ok(Ok(Ok(()))) => {}
                }
                Ok(())
            }
            SessionEnd::RemoteClosed if received == 0 => {
                warn!("Console closed before sending any output");
                Err(BridgeError::TicketRejected)
            }
            SessionEnd::RemoteClosed => {
                // Show the console's last words, but never hang on a stalled terminal
                let last = async {
                    self.output.write_all(&pending).await?;
                    self.output.flush().await
                };
                match tokio::time::timeout(CLOSE_TIMEOUT, last).await {
                    Ok(result) => result?,
                    Err(_) => debug!("Dropped {} bytes of unwritten output", pending.len()),
                }
                Ok(())
            }
        }
    }
}

impl<T, E, W> Drop for TerminalBridge<T, E, W>
where
    T: TerminalControl,
    E: LocalEvents,
    W: AsyncWrite + Unpin + Send,
{
    fn drop(&mut self) {
        // Cancelled or panicked before reaching a terminal state
        self.cleanup();
    }
}

/// Aborts the socket writer when the session ends on any path
struct WriterTask(JoinHandle<Result<(), WsError>>);

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Send queued messages in order; close the socket once the queue closes
fn spawn_socket_writer(
    mut sink: SplitSink<WsStream, Message>,
) -> (mpsc::UnboundedSender<Message>, JoinHandle<Result<(), WsError>>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            sink.send(message).await?;
        }
        sink.close().await
    });
    (tx, task)
}

fn queue(outbound: &mpsc::UnboundedSender<Message>, message: Message) {
    // A failed send means the writer stopped; the select loop reports why
    if outbound.send(message).is_err() {
        trace!("Console writer gone; dropping frame");
    }
}

fn queue_frame(outbound: &mpsc::UnboundedSender<Message>, frame: OutboundFrame) {
    trace!("local -> console: {}", frame_kind(&frame));
    queue(outbound, Message::Binary(frame.encode()));
}

fn writer_stopped(result: Result<Result<(), WsError>, JoinError>) -> BridgeError {
    let raw = match result {
        Ok(Err(e)) => error_chain(&e),
        Ok(Ok(())) => "console writer stopped".to_string(),
        Err(e) => e.to_string(),
    };
    BridgeError::Stream(classify(&raw))
}

/// Progress made by one `drain_output` call
enum Drained {
    Wrote(usize),
    Flushed,
}

/// One write or one flush. Dropping it mid-way loses no output.
async fn drain_output<W>(output: &mut W, pending: &[u8]) -> io::Result<Drained>
where
    W: AsyncWrite + Unpin,
{
    if pending.is_empty() {
        output.flush().await?;
        return Ok(Drained::Flushed);
    }
    match output.write(pending).await? {
        0 => Err(io::ErrorKind::WriteZero.into()),
        n => Ok(Drained::Wrote(n)),
    }
}

fn frame_kind(frame: &OutboundFrame) -> String {
    match frame {
        OutboundFrame::Data(payload) => format!("data ({} bytes)", payload.len()),
        OutboundFrame::Resize { cols, rows } => format!("resize {}x{}", cols, rows),
    }
}

fn build_request(descriptor: &ConnectionDescriptor) -> Result<Request, BridgeError> {
    let mut request = descriptor
        .ws_url
        .as_str()
        .into_client_request()
        .map_err(|e| BridgeError::Connect(classify(&e.to_string())))?;

    let headers = request.headers_mut();
    headers.insert(COOKIE, header_value(&descriptor.cookie)?);
    headers.insert(ORIGIN, header_value(&descriptor.origin)?);
    headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue, BridgeError> {
    HeaderValue::from_str(value)
        .map_err(|e| BridgeError::Connect(classify(&format!("invalid header value: {}", e))))
}

fn tls_connector(insecure: bool) -> Result<Option<Connector>, BridgeError> {
    if !insecure {
        return Ok(None);
    }
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| BridgeError::Connect(classify(&error_chain(&e))))?;
    Ok(Some(Connector::NativeTls(tls)))
}

fn connect_error(err: WsError) -> BridgeError {
    match &err {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::HandshakeIncomplete) => BridgeError::ClosedBeforeOpen,
        WsError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            BridgeError::ClosedBeforeOpen
        }
        _ => BridgeError::Connect(classify(&error_chain(&err))),
    }
}
