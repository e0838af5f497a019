//! Transport layer for Exasol database communication.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - Message transport trait, frames and lifecycle events
//! - `messages` - Protocol message types
//! - `codec` - JSON framing with optional compression
//! - `websocket` - WebSocket transport implementation
//!
//! # Example
//!
//! ```no_run
//! use exadriver::transport::{Frame, TransportEvent, TransportFactory, WebSocketFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut handle = WebSocketFactory::default().create("wss://localhost:8563");
//!
//! if let Some(TransportEvent::Open) = handle.events.recv().await {
//!     handle
//!         .transport
//!         .send(Frame::Text(r#"{"command":"login","protocolVersion":3}"#.to_string()))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod messages;
pub mod protocol;
pub mod websocket;

// Re-export commonly used types
pub use codec::WireCodec;
pub use messages::{Attributes, Column, DataType, SessionInfo, SqlException};
pub use protocol::{
    Frame, MessageTransport, ReadyState, TransportEvent, TransportEvents, TransportFactory,
    TransportHandle,
};
pub use websocket::{WebSocketFactory, WebSocketOptions, WebSocketTransport};
