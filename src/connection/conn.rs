//! One-at-a-time command/response correlation over a message transport.
//!
//! A [`Connection`] sends a single command and completes it with the next
//! inbound message. A background dispatcher consumes the transport's events:
//! messages complete the outstanding command, errors and closes fail it and
//! mark the connection broken.

use crate::error::{ExasolError, Result, TransportError};
use crate::transport::messages::{Command, NoResultCommand, Request, Response, Status};
use crate::transport::{Frame, MessageTransport, TransportEvent, TransportEvents, TransportHandle, WireCodec};
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::Instrument;

use super::params::{CloseHook, ErrorHook};

/// Upper bound for the graceful disconnect during [`Connection::close`].
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Outcome = std::result::Result<Frame, ExasolError>;

/// Callbacks fired on transport errors and closes.
#[derive(Clone, Default)]
pub struct ConnectionHooks {
    pub on_error: Option<ErrorHook>,
    pub on_close: Option<CloseHook>,
}

/// Correlates one outstanding command with its response.
///
/// Cloning yields another handle to the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    transport: Arc<dyn MessageTransport>,
    compression: AtomicBool,
    in_flight: AtomicBool,
    broken: AtomicBool,
    closing: AtomicBool,
    pending: Mutex<Option<oneshot::Sender<Outcome>>>,
    lease: Arc<Semaphore>,
    hooks: ConnectionHooks,
    span: tracing::Span,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Complete the outstanding command, if any.
    fn complete(&self, outcome: Outcome) -> bool {
        match self.slot().take() {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

/// Clears the in-flight flag and the pending slot when a command finishes,
/// including when its future is dropped.
/// Dropping it while still awaiting a sent command's response marks the
/// connection broken; the late reply must not complete the next command.
struct InFlight<'a> {
    inner: &'a Inner,
    awaiting: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.slot().take();
        if self.awaiting {
            tracing::debug!(parent: &self.inner.span, "Command abandoned before its response");
            self.inner.mark_broken();
        }
        self.inner.in_flight.store(false, Ordering::SeqCst);
    }
}

impl Connection {
    /// Wait for the transport to open and start dispatching its events.
    ///
    /// # Errors
    ///
    /// - `InvalidConn` if the transport reports an error before opening
    /// - `Closed` if it closes before opening
    pub async fn establish(
        handle: TransportHandle,
        name: impl Into<String>,
        hooks: ConnectionHooks,
        parent: &tracing::Span,
    ) -> Result<Self> {
        let name = name.into();
        let span = tracing::debug_span!(parent: parent, "connection", name = %name);
        let TransportHandle {
            transport,
            mut events,
        } = handle;

        loop {
            match events.recv().await {
                Some(TransportEvent::Open) => break,
                Some(TransportEvent::Message(_)) => {
                    tracing::debug!(parent: &span, "Dropping message received before open");
                }
                Some(TransportEvent::Error(message)) => {
                    tracing::debug!(parent: &span, error = %message, "Transport error while opening");
                    if let Some(hook) = &hooks.on_error {
                        hook(&message);
                    }
                    transport.close().await;
                    return Err(ExasolError::InvalidConn);
                }
                Some(TransportEvent::Close) | None => {
                    tracing::debug!(parent: &span, "Transport closed while opening");
                    if let Some(hook) = &hooks.on_close {
                        hook();
                    }
                    transport.close().await;
                    return Err(ExasolError::Closed);
                }
            }
        }

        let inner = Arc::new(Inner {
            name,
            transport,
            compression: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            pending: Mutex::new(None),
            lease: Arc::new(Semaphore::new(1)),
            hooks,
            span,
        });

        let dispatcher = dispatch(Arc::downgrade(&inner), events).instrument(inner.span.clone());
        tokio::spawn(dispatcher);

        tracing::trace!(parent: &inner.span, "Connection established");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Toggle compression for subsequent commands in both directions.
    pub fn set_compression(&self, compression: bool) {
        self.inner.compression.store(compression, Ordering::SeqCst);
    }

    pub fn compression(&self) -> bool {
        self.inner.compression.load(Ordering::SeqCst)
    }

    /// Whether a command is outstanding.
    pub fn is_active(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Whether a transport or framing failure made this connection unusable.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Whether commands can currently be sent.
    pub fn is_open(&self) -> bool {
        !self.is_broken() && !self.is_closed() && self.inner.transport.ready_state().is_open()
    }

    fn codec(&self) -> WireCodec {
        WireCodec::new(self.compression())
    }

    /// Wait until no other caller holds this connection.
    ///
    /// Waiters are served in FIFO order. The lease is returned when the
    /// returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Closed` once the connection has been closed.
    pub async fn acquire(&self) -> Result<ConnectionLease> {
        let permit = Arc::clone(&self.inner.lease)
            .acquire_owned()
            .await
            .map_err(|_| ExasolError::Closed)?;

        if self.is_closed() {
            return Err(ExasolError::Closed);
        }

        Ok(ConnectionLease {
            connection: self.clone(),
            _permit: permit,
        })
    }

    /// Handle that aborts the running query without taking the lease.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            connection: self.clone(),
        }
    }

    /// Send a command and wait for its response.
    ///
    /// A response with status `error` that carries an exception is returned as
    /// data, not as an error.
    ///
    /// # Errors
    ///
    /// - `Closed` if the transport is not open
    /// - `InvalidConn` if the connection is broken
    /// - `JobAlreadyRunning` if another command is outstanding
    /// - `MalformedData` if the response is an error without exception or
    ///   does not decode
    /// - `InvalidConn`/`Closed` if the transport fails before the response
    pub async fn send_command<T: DeserializeOwned>(
        &self,
        request: impl Into<Request>,
    ) -> Result<Response<T>> {
        let inner = &*self.inner;
        let request = request.into();

        if !inner.transport.ready_state().is_open() {
            inner.mark_broken();
            return Err(ExasolError::Closed);
        }

        if inner.broken.load(Ordering::SeqCst) {
            return Err(ExasolError::InvalidConn);
        }

        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExasolError::JobAlreadyRunning);
        }
        let mut in_flight = InFlight {
            inner,
            awaiting: false,
        };

        let codec = self.codec();
        let frame = codec.encode(&request)?;

        let (sender, receiver) = oneshot::channel();
        *inner.slot() = Some(sender);

        tracing::trace!(
            parent: &inner.span,
            command = request.name(),
            compression = codec.compression(),
            bytes = frame.len(),
            "Send request"
        );

        in_flight.awaiting = true;
        if let Err(e) = inner.transport.send(frame).await {
            inner.mark_broken();
            return Err(e.into());
        }

        let outcome = receiver.await;
        in_flight.awaiting = false;
        drop(in_flight);

        let frame = match outcome {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ExasolError::Closed),
        };

        let response: Response<T> = codec.decode(&frame).map_err(|e| {
            inner.mark_broken();
            match e {
                TransportError::DeserializationError(detail) => {
                    tracing::error!(parent: &inner.span, error = %detail, "Failed to decode response");
                    ExasolError::MalformedData
                }
                other => other.into(),
            }
        })?;

        match (response.status, &response.exception) {
            (Status::Ok, _) => Ok(response),
            (Status::Error, Some(exception)) => {
                tracing::trace!(parent: &inner.span, sql_code = %exception.sql_code, "Received server exception");
                Ok(response)
            }
            (Status::Error, None) => {
                tracing::trace!(parent: &inner.span, "Received error status without exception");
                inner.mark_broken();
                Err(ExasolError::MalformedData)
            }
        }
    }

    /// Send a command without waiting for any response.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the transport is not open.
    pub async fn send_command_with_no_result(&self, command: NoResultCommand) -> Result<()> {
        let inner = &*self.inner;

        if !inner.transport.ready_state().is_open() {
            inner.mark_broken();
            return Err(ExasolError::Closed);
        }

        let request = Request::from(command);
        let frame = self.codec().encode(&request)?;
        tracing::trace!(parent: &inner.span, command = request.name(), "Send request with no result");

        inner.transport.send(frame).await.map_err(|e| {
            inner.mark_broken();
            e.into()
        })
    }

    /// Close the connection.
    ///
    /// If the transport is open and the connection is not broken, a graceful
    /// `disconnect` is attempted first; a
    /// failure there is logged. The transport is always closed afterwards and
    /// an outstanding command fails with `Closed`. Idempotent.
    pub async fn close(&self) {
        let inner = &*self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.lease.close();

        if inner.transport.ready_state().is_open() && !inner.broken.load(Ordering::SeqCst) {
            let disconnect = self.send_command::<serde_json::Value>(Command::Disconnect);
            match tokio::time::timeout(DISCONNECT_TIMEOUT, disconnect).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(parent: &inner.span, error = %e, "Graceful closing failed");
                }
                Err(_) => {
                    tracing::warn!(parent: &inner.span, "Graceful closing timed out");
                }
            }
        }

        inner.transport.close().await;
        inner.complete(Err(ExasolError::Closed));
        tracing::trace!(parent: &inner.span, "Closed connection");
    }
}

/// Exclusive use of a [`Connection`], released on drop.
pub struct ConnectionLease {
    connection: Connection,
    _permit: OwnedSemaphorePermit,
}

impl Deref for ConnectionLease {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

/// Aborts the query running on a connection.
///
/// Cancellation is out-of-band: it sends `abortQuery` while the original
/// command is still outstanding and does not close the connection.
#[derive(Clone)]
pub struct CancelHandle {
    connection: Connection,
}

impl CancelHandle {
    pub async fn cancel(&self) -> Result<()> {
        self.connection
            .send_command_with_no_result(NoResultCommand::AbortQuery)
            .await
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("connection", &self.connection.name())
            .finish()
    }
}

async fn dispatch(inner: Weak<Inner>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let closing = inner.closing.load(Ordering::SeqCst);

        match event {
            TransportEvent::Message(frame) => {
                if !inner.complete(Ok(frame)) {
                    tracing::debug!("Dropping message with no outstanding command");
                }
            }
            TransportEvent::Error(message) => {
                inner.complete(Err(ExasolError::InvalidConn));
                if closing {
                    continue;
                }
                tracing::error!(error = %message, "WebSocket error");
                inner.mark_broken();
                if let Some(hook) = &inner.hooks.on_error {
                    hook(&message);
                }
            }
            TransportEvent::Close => {
                inner.complete(Err(ExasolError::Closed));
                if closing {
                    continue;
                }
                tracing::debug!("Got close event");
                inner.mark_broken();
                if let Some(hook) = &inner.hooks.on_close {
                    hook();
                }
            }
            TransportEvent::Open => {}
        }
    }
}
