//! WebSocket transport implementation for Exasol.
//!
//! Each transport owns a background I/O task that performs the opening
//! handshake, forwards queued outbound frames to the socket and reports
//! inbound frames and lifecycle changes as [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, Connector, MaybeTlsStream,
    WebSocketStream,
};

use crate::error::TransportError;

use super::protocol::{
    Frame, MessageTransport, ReadyState, TransportEvent, TransportFactory, TransportHandle,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

fn ready_state_from(value: u8) -> ReadyState {
    match value {
        CONNECTING => ReadyState::Connecting,
        OPEN => ReadyState::Open,
        CLOSING => ReadyState::Closing,
        _ => ReadyState::Closed,
    }
}

/// Socket-level options for WebSocket transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketOptions {
    /// Reject self-signed or mismatching server certificates
    pub validate_certificate: bool,
    /// Upper bound for the opening handshake
    pub connect_timeout: Duration,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            validate_certificate: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Factory producing [`WebSocketTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory {
    options: WebSocketOptions,
}

impl WebSocketFactory {
    pub fn new(options: WebSocketOptions) -> Self {
        Self { options }
    }
}

impl TransportFactory for WebSocketFactory {
    fn create(&self, url: &str) -> TransportHandle {
        WebSocketTransport::open(url, self.options.clone())
    }
}

enum Outgoing {
    Frame(Frame),
    Close,
}

/// WebSocket transport implementation.
///
/// Sending only queues the frame for the I/O task; write failures surface as
/// `Error` events.
pub struct WebSocketTransport {
    state: Arc<AtomicU8>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl WebSocketTransport {
    /// Start connecting to `url` and return the transport with its event stream.
    ///
    /// Must be called from within a Tokio runtime; otherwise the returned
    /// stream reports an error followed by a close.
    pub fn open(url: &str, options: WebSocketOptions) -> TransportHandle {
        let state = Arc::new(AtomicU8::new(CONNECTING));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            state: Arc::clone(&state),
            outgoing: outgoing_tx,
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_io(url.to_string(), options, state, outgoing_rx, events_tx));
            }
            Err(e) => {
                state.store(CLOSED, Ordering::SeqCst);
                let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                let _ = events_tx.send(TransportEvent::Close);
            }
        }

        TransportHandle::new(transport, events_rx)
    }
}

#[async_trait]
impl MessageTransport for WebSocketTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.ready_state() != ReadyState::Open {
            return Err(TransportError::SendError("WebSocket is not open".to_string()));
        }
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| TransportError::SendError("WebSocket I/O task has stopped".to_string()))
    }

    async fn close(&self) {
        let previous = self.state.fetch_max(CLOSING, Ordering::SeqCst);
        if previous < CLOSING {
            let _ = self.outgoing.send(Outgoing::Close);
        }
    }

    fn ready_state(&self) -> ReadyState {
        ready_state_from(self.state.load(Ordering::SeqCst))
    }
}

async fn connect(url: &str, options: &WebSocketOptions) -> Result<WsStream, TransportError> {
    let connector = if options.validate_certificate {
        None
    } else {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| TransportError::WebSocketError(e.to_string()))?;
        Some(Connector::NativeTls(tls))
    };

    let (ws_stream, _) = connect_async_tls_with_config(url, None, false, connector).await?;
    Ok(ws_stream)
}

async fn run_io(
    url: String,
    options: WebSocketOptions,
    state: Arc<AtomicU8>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let connected = tokio::time::timeout(options.connect_timeout, connect(&url, &options)).await;
    let ws_stream = match connected {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "WebSocket connect failed");
            finish(&state, &events, Some(e.to_string()));
            return;
        }
        Err(_) => {
            let message = format!(
                "Connection timeout after {}ms",
                options.connect_timeout.as_millis()
            );
            finish(&state, &events, Some(message));
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();

    // close() may have been called while the handshake was running
    if state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        let _ = sink.close().await;
        finish(&state, &events, None);
        return;
    }
    let _ = events.send(TransportEvent::Open);

    let mut failure = None;
    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(Outgoing::Frame(frame)) => {
                    let message = match frame {
                        Frame::Text(text) => Message::Text(text),
                        Frame::Binary(bytes) => Message::Binary(bytes),
                    };
                    if let Err(e) = sink.send(message).await {
                        failure = Some(e.to_string());
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    state.store(CLOSING, Ordering::SeqCst);
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(Frame::Text(text)));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.send(TransportEvent::Message(Frame::Binary(bytes)));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    failure = Some(e.to_string());
                    break;
                }
            },
        }
    }

    finish(&state, &events, failure);
}

fn finish(state: &AtomicU8, events: &mpsc::UnboundedSender<TransportEvent>, failure: Option<String>) {
    state.store(CLOSED, Ordering::SeqCst);
    if let Some(message) = failure {
        let _ = events.send(TransportEvent::Error(message));
    }
    let _ = events.send(TransportEvent::Close);
}
