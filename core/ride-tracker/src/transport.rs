//! Channel adapters.
//!
//! Each adapter owns one connection or one request and reports what happened
//! back to the event loop as a `RuntimeEvent`. Adapters never touch session
//! state and know nothing about each other.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use ride_core::{PullPayload, PullTarget, SessionEvent};
use ride_protocol::{parse_ride_details, parse_status_response, ErrorInfo, NORMAL_CLOSURE};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a socket read blocks before the reader checks for a close request.
const READ_TIMEOUT: Duration = Duration::from_millis(250);
const CLOSE_DRAIN_READS: usize = 8;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Response rejected: {0}")]
    Decode(ErrorInfo),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the event loop hears from transport threads.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Lifecycle or message from push socket number `socket`.
    Push { socket: u64, event: SessionEvent },
    PullDone {
        request_id: u64,
        result: Result<PullPayload, String>,
    },
}

pub trait PushTransport {
    /// Starts connecting. Progress arrives on `events` as `PushOpened`,
    /// `PushMessage`, `PushClosed` or `PushError`, tagged with `socket`.
    fn open(&mut self, socket: u64, url: &str, events: Sender<RuntimeEvent>) -> Box<dyn PushLink>;
}

/// Handle to one open (or opening) push socket.
pub trait PushLink {
    fn close(&mut self, code: u16);
}

pub trait PullTransport: Send + Sync {
    fn fetch(&self, url: &str, target: PullTarget) -> Result<PullPayload, TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket push
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct WsPushTransport;

struct WsLink {
    close_tx: Sender<u16>,
}

impl PushLink for WsLink {
    fn close(&mut self, code: u16) {
        // Reader already gone means the socket is closed too.
        let _ = self.close_tx.send(code);
    }
}

impl PushTransport for WsPushTransport {
    fn open(&mut self, socket: u64, url: &str, events: Sender<RuntimeEvent>) -> Box<dyn PushLink> {
        let (close_tx, close_rx) = mpsc::channel();
        let url = url.to_string();
        let thread_events = events.clone();
        let spawned = thread::Builder::new()
            .name(format!("push-{}", socket))
            .spawn(move || run_socket(socket, &url, &thread_events, &close_rx));
        if let Err(err) = spawned {
            tracing::error!(error = %err, "Failed to spawn push reader");
            let _ = events.send(RuntimeEvent::Push {
                socket,
                event: SessionEvent::PushError {
                    reason: err.to_string(),
                },
            });
        }
        Box::new(WsLink { close_tx })
    }
}

fn run_socket(socket: u64, url: &str, events: &Sender<RuntimeEvent>, close_rx: &Receiver<u16>) {
    let send = |event: SessionEvent| events.send(RuntimeEvent::Push { socket, event }).is_ok();

    let mut ws = match tungstenite::connect(url) {
        Ok((ws, _response)) => ws,
        Err(err) => {
            tracing::warn!(url, error = %err, "Push connect failed");
            send(SessionEvent::PushError {
                reason: err.to_string(),
            });
            return;
        }
    };
    if let Err(err) = set_read_timeout(&ws, READ_TIMEOUT) {
        tracing::warn!(error = %err, "Failed to configure push socket");
        close_socket(&mut ws, NORMAL_CLOSURE);
        send(SessionEvent::PushError {
            reason: err.to_string(),
        });
        return;
    }
    // Closed before the handshake finished; the loop no longer wants it.
    if let Ok(code) = close_rx.try_recv() {
        close_socket(&mut ws, code);
        return;
    }
    if !send(SessionEvent::PushOpened) {
        close_socket(&mut ws, NORMAL_CLOSURE);
        return;
    }

    loop {
        match close_rx.try_recv() {
            Ok(code) => {
                close_socket(&mut ws, code);
                return;
            }
            Err(TryRecvError::Disconnected) => {
                close_socket(&mut ws, NORMAL_CLOSURE);
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        let event = match ws.read() {
            Ok(Message::Text(text)) => SessionEvent::PushMessage { text },
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => SessionEvent::PushMessage { text },
                Err(_) => {
                    tracing::warn!("Dropping non-UTF-8 binary push frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let code = frame.map(|frame| u16::from(frame.code));
                send(SessionEvent::PushClosed { code });
                return;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                send(SessionEvent::PushClosed { code: None });
                return;
            }
            Err(err) => {
                send(SessionEvent::PushError {
                    reason: err.to_string(),
                });
                return;
            }
        };
        if !send(event) {
            close_socket(&mut ws, NORMAL_CLOSURE);
            return;
        }
    }
}

fn set_read_timeout(ws: &Socket, timeout: Duration) -> std::io::Result<()> {
    match ws.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

fn close_socket(ws: &mut Socket, code: u16) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    };
    if let Err(err) = ws.close(Some(frame)) {
        tracing::debug!(error = %err, "Push close handshake failed");
        return;
    }
    // Give the server a chance to acknowledge.
    for _ in 0..CLOSE_DRAIN_READS {
        if ws.read().is_err() {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP pull
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpPullTransport {
    client: reqwest::blocking::Client,
}

impl HttpPullTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl PullTransport for HttpPullTransport {
    fn fetch(&self, url: &str, target: PullTarget) -> Result<PullPayload, TransportError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes()?;
        decode_pull(target, &body)
    }
}

pub fn decode_pull(target: PullTarget, body: &[u8]) -> Result<PullPayload, TransportError> {
    match target {
        PullTarget::Status => parse_status_response(body).map(PullPayload::Status),
        PullTarget::Details => parse_ride_details(body).map(PullPayload::Details),
    }
    .map_err(TransportError::Decode)
}
