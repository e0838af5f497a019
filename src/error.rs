//! Error types for exadriver.
//!
//! Every public operation reports failures through [`ExasolError`], so callers
//! can handle all error kinds on a single path. Transport and configuration
//! failures keep their own enums and are wrapped transparently.

use crate::transport::messages::SqlException;
use thiserror::Error;

/// Top-level error type returned by every driver, statement and pool operation.
#[derive(Error, Debug)]
pub enum ExasolError {
    /// Neither a username/password pair nor an access/refresh token is configured
    #[error("E-EDJS-6: Invalid credentials.")]
    InvalidCredentials,

    /// The transport reported an error or is otherwise unusable
    #[error("E-EDJS-2: Invalid connection.")]
    InvalidConn,

    /// Operation attempted on a closed or closing connection or driver
    #[error("E-EDJS-3: Connection is closed.")]
    Closed,

    /// A command was sent while another one is still outstanding
    #[error("E-EDJS-4: A command is already running on this connection.")]
    JobAlreadyRunning,

    /// The response was neither ok nor a structured server exception
    #[error("E-EDJS-5: Received malformed data.")]
    MalformedData,

    /// Prepared statement argument count is not a multiple of the column count
    #[error("E-EDJS-7: Number of values does not match the number of columns.")]
    InvalidValuesCount,

    /// A prepared statement argument cannot be encoded
    #[error("Invalid parameter at index {index}: {message}")]
    InvalidParameter { index: usize, message: String },

    /// `query` was used for a statement that returned a row count
    #[error("E-EDJS-8: Invalid return value, expected a result set but got a row count.")]
    InvalidReturnValueRowCount,

    /// `execute` was used for a statement that returned a result set
    #[error("E-EDJS-9: Invalid return value, expected a row count but got a result set.")]
    InvalidReturnValueResultSet,

    /// The pool no longer hands out drivers
    #[error("E-EDJS-10: Pool is draining.")]
    PoolDraining,

    /// Exception reported by the server
    #[error("{0}")]
    Server(SqlException),

    /// The login handshake could not encrypt the password
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport protocol errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExasolError {
    /// Whether the error leaves the connection unusable.
    ///
    /// Transport and framing failures are fatal; server-reported SQL errors and
    /// caller mistakes are recoverable per call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExasolError::InvalidConn
                | ExasolError::Closed
                | ExasolError::MalformedData
                | ExasolError::Transport(_)
        )
    }

    /// The server exception, if this error carries one.
    pub fn sql_exception(&self) -> Option<&SqlException> {
        match self {
            ExasolError::Server(exception) => Some(exception),
            _ => None,
        }
    }
}

/// Errors related to the message transport and the wire codec.
#[derive(Error, Debug)]
pub enum TransportError {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Message serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Message deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Deflate or inflate failure
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Message send error
    #[error("Failed to send message: {0}")]
    SendError(String),

    /// The frame kind does not match the negotiated encoding
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
}

/// Errors related to driver and pool configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration parameter
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TransportError::DeserializationError(err.to_string())
        } else {
            TransportError::SerializationError(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocketError(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ExasolError> = std::result::Result<T, E>;
