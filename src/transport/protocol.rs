//! Message transport abstraction.
//!
//! A transport is a bidirectional, message-oriented channel that is opened
//! asynchronously and reports its lifecycle through [`TransportEvent`]s. The
//! connection layer only ever talks to the [`MessageTransport`] trait, so the
//! WebSocket implementation can be replaced by an in-memory one in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Opening handshake in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// Close has been requested
    Closing,
    /// Transport is closed
    Closed,
}

impl ReadyState {
    pub fn is_open(self) -> bool {
        self == ReadyState::Open
    }
}

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON text
    Text(String),
    /// Deflated JSON
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle and data events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport is open
    Open,
    /// An inbound frame
    Message(Frame),
    /// The transport failed; a `Close` usually follows
    Error(String),
    /// The transport is closed; no further events follow
    Close,
}

/// Sending half of a transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Queue a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the transport is not open or the frame
    /// cannot be handed to the underlying socket.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Close the transport. Idempotent; a `Close` event follows.
    async fn close(&self);

    /// Current lifecycle state.
    fn ready_state(&self) -> ReadyState;
}

/// Receiving half of a transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// A freshly created transport together with its event stream.
pub struct TransportHandle {
    pub transport: Arc<dyn MessageTransport>,
    pub events: TransportEvents,
}

impl TransportHandle {
    pub fn new(transport: Arc<dyn MessageTransport>, events: TransportEvents) -> Self {
        Self { transport, events }
    }
}

/// Creates transports for a URL.
///
/// Creation never fails synchronously; connection failures are reported as
/// `Error`/`Close` events on the returned stream.
pub trait TransportFactory: Send + Sync {
    fn create(&self, url: &str) -> TransportHandle;
}

impl<F> TransportFactory for F
where
    F: Fn(&str) -> TransportHandle + Send + Sync,
{
    fn create(&self, url: &str) -> TransportHandle {
        self(url)
    }
}
