//! Driver: one authenticated session over one connection.
//!
//! A [`Driver`] opens its transport through a [`TransportFactory`], runs the
//! login handshake and then serializes every operation on its single
//! [`Connection`]. Concurrent callers queue on the connection lease in FIFO
//! order; real parallelism needs several drivers, see [`Pool`](crate::Pool).

use crate::connection::auth::{credentials_payload, encrypt_password, token_payload};
use crate::connection::{CancelHandle, Connection, ConnectionHooks, ConnectionLease, Credentials, DriverConfig};
use crate::error::{ExasolError, Result};
use crate::query::{fetch_remaining, FetchLimits, QueryOptions, QueryResult, Statement};
use crate::transport::messages::{
    Command, CreatePreparedStatementCommand, CreatePreparedStatementResponse, ExecuteBatchCommand,
    ExecuteCommand, LoginCommand, PublicKeyResponse, Response, ResultType, SessionInfo, SqlResult,
    SqlResults,
};
use crate::transport::{TransportFactory, WebSocketFactory, WebSocketOptions};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Exasol driver bound to a single session.
///
/// # Example
///
/// ```no_run
/// use exadriver::{Driver, DriverConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DriverConfig::builder()
///     .host("localhost")
///     .user("sys")
///     .password("exasol")
///     .build()?;
///
/// let driver = Driver::new(config);
/// driver.connect().await?;
///
/// driver.execute("CREATE SCHEMA S").await?;
/// let result = driver.query("SELECT 1 AS ONE").await?;
/// assert_eq!(result.column_names(), vec!["ONE"]);
///
/// driver.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Driver {
    config: DriverConfig,
    factory: Arc<dyn TransportFactory>,
    connection: Mutex<Option<Connection>>,
    connecting: tokio::sync::Mutex<()>,
    session: Mutex<Option<SessionInfo>>,
    closed: AtomicBool,
    span: tracing::Span,
}

impl Driver {
    /// Create a driver that connects over WebSocket.
    pub fn new(config: DriverConfig) -> Self {
        let factory = WebSocketFactory::new(WebSocketOptions {
            validate_certificate: config.validate_certificate,
            connect_timeout: config.connect_timeout,
        });
        Self::with_factory(config, factory)
    }

    /// Create a driver that opens its transport through `factory`.
    pub fn with_factory(config: DriverConfig, factory: impl TransportFactory + 'static) -> Self {
        let span = default_span(&config);
        Self::from_parts(config, Arc::new(factory), span)
    }

    pub(crate) fn from_parts(
        config: DriverConfig,
        factory: Arc<dyn TransportFactory>,
        span: tracing::Span,
    ) -> Self {
        Self {
            config,
            factory,
            connection: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// Log inside `span` instead of the default `exadriver` span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn connection_slot(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self) -> FetchLimits {
        FetchLimits {
            fetch_size: self.config.fetch_size,
            max_rows: self.config.result_set_max_rows,
        }
    }

    /// Open the transport and log in.
    ///
    /// Calling `connect` on a connected driver does nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` if neither user and password nor a token is set
    /// - `Closed` if the driver was closed, or the transport closed while opening
    /// - `InvalidConn` if the transport failed while opening
    /// - `Server` if the server rejected the login
    pub async fn connect(&self) -> Result<()> {
        let credentials = self
            .config
            .credentials()
            .ok_or(ExasolError::InvalidCredentials)?;

        let _connecting = self.connecting.lock().await;
        if self.is_closed() {
            return Err(ExasolError::Closed);
        }
        if self.connection_slot().is_some() {
            return Ok(());
        }

        let url = self.config.websocket_url();
        let name = format!(
            "{}#{}",
            self.config.host,
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
        );
        tracing::debug!(parent: &self.span, url = %url, connection = %name, "Connecting");

        let hooks = ConnectionHooks {
            on_error: self.config.on_error.clone(),
            on_close: self.config.on_close.clone(),
        };
        let connection =
            Connection::establish(self.factory.create(&url), name, hooks, &self.span).await?;

        let session = match self.login(&connection, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(parent: &self.span, error = %e, "Login failed");
                connection.close().await;
                return Err(e);
            }
        };

        if !credentials.is_basic() && self.config.compression {
            connection.set_compression(true);
        }

        tracing::debug!(
            parent: &self.span,
            session_id = session.session_id,
            release = %session.release_version,
            compression = connection.compression(),
            "Connected"
        );

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        *self.connection_slot() = Some(connection);
        Ok(())
    }

    async fn login(&self, connection: &Connection, credentials: &Credentials) -> Result<SessionInfo> {
        let lease = connection.acquire().await?;
        let login = LoginCommand {
            protocol_version: self.config.protocol_version,
        };

        match credentials {
            Credentials::Password { username, password } => {
                let key: PublicKeyResponse = lease
                    .send_command(Command::Login(login))
                    .await?
                    .into_result()?;
                let encrypted = encrypt_password(password, &key)?;

                lease
                    .send_command(credentials_payload(username, encrypted, &self.config))
                    .await?
                    .into_result()
            }
            Credentials::Token {
                access_token,
                refresh_token,
            } => {
                let ack: Response<Value> = lease.send_command(Command::LoginToken(login)).await?;
                if let Some(exception) = ack.exception {
                    return Err(ExasolError::Server(exception));
                }

                let payload = token_payload(
                    access_token.as_deref(),
                    refresh_token.as_deref(),
                    &self.config,
                );
                lease.send_command(payload).await?.into_result()
            }
        }
    }

    fn connection(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(ExasolError::Closed);
        }
        self.connection_slot().clone().ok_or(ExasolError::InvalidConn)
    }

    async fn lease(&self, options: &mut QueryOptions) -> Result<ConnectionLease> {
        let lease = self.connection()?.acquire().await?;
        if let Some(hook) = options.take_cancel_hook() {
            hook(lease.cancel_handle());
        }
        Ok(lease)
    }

    /// Send any command and return the raw response.
    ///
    /// The connection is held for the duration of the call and released
    /// whether it succeeds or fails.
    pub async fn send_command<T: DeserializeOwned>(
        &self,
        command: Command,
        mut options: QueryOptions,
    ) -> Result<Response<T>> {
        let lease = self.lease(&mut options).await?;
        lease.send_command(command).await
    }

    async fn run(&self, command: Command, mut options: QueryOptions) -> Result<Response<SqlResults>> {
        let lease = self.lease(&mut options).await?;
        let response = lease.send_command(command).await?;
        fetch_remaining(&lease, response, self.limits()).await
    }

    /// Run a query and return its result set.
    ///
    /// # Errors
    ///
    /// - `InvalidReturnValueRowCount` if the statement produced a row count
    /// - `Server` if the server rejected the statement
    /// - `MalformedData` if the columns hold differing row counts
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.query_with(sql, QueryOptions::default()).await
    }

    pub async fn query_with(&self, sql: &str, options: QueryOptions) -> Result<QueryResult> {
        let first = first_result(self.query_raw(sql, options).await?)?;
        match first.result_type {
            ResultType::RowCount => Err(ExasolError::InvalidReturnValueRowCount),
            ResultType::ResultSet => {
                QueryResult::new(first.result_set.ok_or(ExasolError::MalformedData)?)
            }
        }
    }

    /// Run a single statement and return the completed response unvalidated.
    pub async fn query_raw(&self, sql: &str, options: QueryOptions) -> Result<Response<SqlResults>> {
        let command = Command::Execute(ExecuteCommand::new(sql, options.attributes.clone()));
        self.run(command, options).await
    }

    /// Run a statement and return its row count.
    ///
    /// # Errors
    ///
    /// - `InvalidReturnValueResultSet` if the statement produced a result set
    /// - `Server` if the server rejected the statement
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.execute_with(sql, QueryOptions::default()).await
    }

    pub async fn execute_with(&self, sql: &str, options: QueryOptions) -> Result<u64> {
        let first = first_result(self.execute_raw(sql, options).await?)?;
        match first.result_type {
            ResultType::ResultSet => Err(ExasolError::InvalidReturnValueResultSet),
            ResultType::RowCount => Ok(first.row_count.unwrap_or(0)),
        }
    }

    pub async fn execute_raw(&self, sql: &str, options: QueryOptions) -> Result<Response<SqlResults>> {
        self.query_raw(sql, options).await
    }

    /// Run several statements in one round trip.
    ///
    /// The response is returned as received, including a server exception.
    pub async fn execute_batch<S: AsRef<str>>(
        &self,
        statements: &[S],
        options: QueryOptions,
    ) -> Result<Response<SqlResults>> {
        let command = Command::ExecuteBatch(ExecuteBatchCommand {
            sql_texts: statements.iter().map(|s| s.as_ref().to_string()).collect(),
            attributes: options.attributes.clone(),
        });
        self.run(command, options).await
    }

    /// Create a server-side prepared statement.
    pub async fn prepare(&self, sql: &str) -> Result<Statement> {
        self.prepare_with(sql, QueryOptions::default()).await
    }

    pub async fn prepare_with(&self, sql: &str, mut options: QueryOptions) -> Result<Statement> {
        let lease = self.lease(&mut options).await?;
        let created: CreatePreparedStatementResponse = lease
            .send_command(Command::CreatePreparedStatement(CreatePreparedStatementCommand {
                sql_text: sql.to_string(),
            }))
            .await?
            .into_result()?;

        let columns = created
            .parameter_data
            .map(|parameters| parameters.columns)
            .unwrap_or_default();
        tracing::trace!(
            parent: &self.span,
            handle = created.statement_handle,
            parameters = columns.len(),
            "Prepared statement"
        );

        Ok(Statement::new(
            Connection::clone(&lease),
            created.statement_handle,
            columns,
            self.limits(),
        ))
    }

    /// Abort the query currently running on this driver.
    pub async fn cancel(&self) -> Result<()> {
        self.cancel_handle()?.cancel().await
    }

    /// Handle for aborting queries from another task.
    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        Ok(self.connection()?.cancel_handle())
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let connection = self.connection_slot().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        tracing::debug!(parent: &self.span, "Driver closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the driver holds an open, healthy connection.
    pub fn is_connected(&self) -> bool {
        !self.is_closed()
            && self
                .connection_slot()
                .as_ref()
                .is_some_and(Connection::is_open)
    }

    /// Session information returned by the login handshake.
    pub fn session(&self) -> Option<SessionInfo> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) fn default_span(config: &DriverConfig) -> tracing::Span {
    tracing::info_span!("exadriver", host = %config.host)
}

fn first_result(response: Response<SqlResults>) -> Result<SqlResult> {
    let results = response.into_result()?;
    if results.num_results == 0 {
        return Err(ExasolError::MalformedData);
    }
    results
        .results
        .into_iter()
        .next()
        .ok_or(ExasolError::MalformedData)
}
