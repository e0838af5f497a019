//! WebSocket message types for the Exasol protocol.
//!
//! Commands are JSON objects tagged by a `command` field. The two login
//! payloads that follow the `login`/`loginToken` commands carry no tag and are
//! modelled separately. Every response shares the same envelope: a status,
//! an optional structured exception and command-specific `responseData`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tagged protocol command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    /// Start a username/password login; the server answers with its public key
    Login(LoginCommand),
    /// Start a token login
    LoginToken(LoginCommand),
    /// Execute a single SQL statement
    Execute(ExecuteCommand),
    /// Execute several SQL statements in one round trip
    ExecuteBatch(ExecuteBatchCommand),
    /// Create a server-side prepared statement
    CreatePreparedStatement(CreatePreparedStatementCommand),
    /// Execute a prepared statement with column-major parameter data
    ExecutePreparedStatement(ExecutePreparedStatementCommand),
    /// Release a prepared statement handle
    ClosePreparedStatement(ClosePreparedStatementCommand),
    /// Fetch further rows of a result set
    Fetch(FetchCommand),
    /// Abort the currently running query
    AbortQuery,
    /// Close the session
    Disconnect,
}

/// Commands that are sent without awaiting a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoResultCommand {
    AbortQuery,
    Disconnect,
}

impl From<NoResultCommand> for Command {
    fn from(cmd: NoResultCommand) -> Self {
        match cmd {
            NoResultCommand::AbortQuery => Command::AbortQuery,
            NoResultCommand::Disconnect => Command::Disconnect,
        }
    }
}

/// Any message a client can put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Request {
    Command(Command),
    Credentials(CredentialsPayload),
    Token(TokenPayload),
}

impl From<Command> for Request {
    fn from(cmd: Command) -> Self {
        Request::Command(cmd)
    }
}

impl From<NoResultCommand> for Request {
    fn from(cmd: NoResultCommand) -> Self {
        Request::Command(cmd.into())
    }
}

impl From<CredentialsPayload> for Request {
    fn from(payload: CredentialsPayload) -> Self {
        Request::Credentials(payload)
    }
}

impl From<TokenPayload> for Request {
    fn from(payload: TokenPayload) -> Self {
        Request::Token(payload)
    }
}

impl Request {
    /// Name of the command for log output; login payloads report their kind.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Command(cmd) => match cmd {
                Command::Login(_) => "login",
                Command::LoginToken(_) => "loginToken",
                Command::Execute(_) => "execute",
                Command::ExecuteBatch(_) => "executeBatch",
                Command::CreatePreparedStatement(_) => "createPreparedStatement",
                Command::ExecutePreparedStatement(_) => "executePreparedStatement",
                Command::ClosePreparedStatement(_) => "closePreparedStatement",
                Command::Fetch(_) => "fetch",
                Command::AbortQuery => "abortQuery",
                Command::Disconnect => "disconnect",
            },
            Request::Credentials(_) => "credentials",
            Request::Token(_) => "token",
        }
    }
}

/// Payload of `login` and `loginToken`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCommand {
    pub protocol_version: u32,
}

/// Payload of `execute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommand {
    pub sql_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl ExecuteCommand {
    pub fn new(sql_text: impl Into<String>, attributes: Option<Attributes>) -> Self {
        Self {
            sql_text: sql_text.into(),
            attributes,
        }
    }
}

/// Payload of `executeBatch`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBatchCommand {
    pub sql_texts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

/// Payload of `createPreparedStatement`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreparedStatementCommand {
    pub sql_text: String,
}

/// Payload of `executePreparedStatement`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePreparedStatementCommand {
    pub statement_handle: i32,
    pub num_columns: usize,
    pub num_rows: usize,
    pub columns: Vec<Column>,
    /// Column-major values: `data[column][row]`
    pub data: Vec<Vec<Value>>,
}

/// Payload of `closePreparedStatement`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePreparedStatementCommand {
    pub statement_handle: i32,
}

/// Payload of `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCommand {
    pub result_set_handle: i32,
    /// Zero-based row to start from
    pub start_position: u64,
    /// Upper bound for the size of the returned message
    pub num_bytes: u64,
}

/// Username/password payload sent after `login`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsPayload {
    pub username: String,
    /// RSA-encrypted, base64-encoded password
    pub password: String,
    #[serde(flatten)]
    pub client: ClientInfo,
}

impl fmt::Debug for CredentialsPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsPayload")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client", &self.client)
            .finish()
    }
}

/// Token payload sent after `loginToken`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(flatten)]
    pub client: ClientInfo,
}

impl fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("client", &self.client)
            .finish()
    }
}

/// Client identification shared by both login payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub use_compression: bool,
    pub client_name: String,
    pub driver_name: String,
    pub client_os: String,
    pub client_version: String,
    pub client_runtime: String,
    pub attributes: Attributes,
}

/// Session and statement attributes.
///
/// Unset fields are omitted on the wire so the server keeps its current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autocommit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_like_escape_character: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_characters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_transactions_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_utc_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone_behavior: Option<String>,
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Exception information from Exasol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlException {
    #[serde(default)]
    pub sql_code: String,
    pub text: String,
}

impl fmt::Display for SqlException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQL code: {})", self.text, self.sql_code)
    }
}

/// Response envelope shared by all commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<SqlException>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub response_data: Option<T>,
}

impl<T> Response<T> {
    /// Build a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            status: Status::Ok,
            exception: None,
            response_data: Some(data),
        }
    }

    /// Build an error response carrying a server exception.
    pub fn error(exception: SqlException) -> Self {
        Self {
            status: Status::Error,
            exception: Some(exception),
            response_data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Convert into the response data, surfacing a server exception as an error.
    pub fn into_result(self) -> crate::error::Result<T> {
        match (self.status, self.exception, self.response_data) {
            (Status::Error, Some(exception), _) => Err(crate::error::ExasolError::Server(exception)),
            (Status::Ok, _, Some(data)) => Ok(data),
            _ => Err(crate::error::ExasolError::MalformedData),
        }
    }
}

/// Response data of `login`: the server's RSA public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    /// Hex-encoded modulus
    pub public_key_modulus: String,
    /// Hex-encoded public exponent
    pub public_key_exponent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_pem: Option<String>,
}

/// Session information returned after successful login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionInfo {
    pub session_id: u64,
    pub protocol_version: u32,
    pub release_version: String,
    pub database_name: String,
    pub product_name: String,
    pub max_data_message_size: u64,
    pub max_identifier_length: u32,
    pub max_varchar_length: u64,
    pub identifier_quote_string: String,
    pub time_zone: String,
    pub time_zone_behavior: String,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

/// Exasol data type descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_local_time_zone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<i32>,
}

impl DataType {
    /// A descriptor carrying only the type name.
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            precision: None,
            scale: None,
            size: None,
            character_set: None,
            with_local_time_zone: None,
            fraction: None,
            srid: None,
        }
    }
}

/// Kind of a single statement result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultType {
    ResultSet,
    RowCount,
}

/// Result set as delivered on the wire.
///
/// `data` is column-major: `data[column][row]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_set_handle: Option<i32>,
    pub num_columns: usize,
    /// Total number of rows available on the server
    pub num_rows: u64,
    /// Number of rows delivered so far
    pub num_rows_in_message: u64,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<Value>>>,
}

/// Result of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResult {
    pub result_type: ResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_set: Option<ResultSetData>,
}

/// Response data of `execute`, `executeBatch` and `executePreparedStatement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResults {
    pub num_results: usize,
    pub results: Vec<SqlResult>,
}

/// Response data of `fetch`. `data` is column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub num_rows: u64,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// Response data of `createPreparedStatement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePreparedStatementResponse {
    pub statement_handle: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_data: Option<ParameterData>,
}

/// Parameter description of a prepared statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterData {
    pub num_columns: usize,
    pub columns: Vec<Column>,
}
