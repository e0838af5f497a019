//! Prepared statement handling for parameterized queries.
//!
//! This module provides the [`Statement`] type for executing parameterized
//! queries using Exasol's native prepared statement protocol.

use crate::connection::Connection;
use crate::error::{ExasolError, Result};
use crate::query::results::{fetch_remaining, FetchLimits};
use crate::transport::messages::{
    ClosePreparedStatementCommand, Column, Command, ExecutePreparedStatementCommand, Response,
    SqlResults,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Parameter value for prepared statement execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Binary data, sent hex-encoded
    Binary(Vec<u8>),
    /// Any JSON value, sent as is
    Json(Value),
}

impl Parameter {
    /// Encode as a wire value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for NaN and infinite floats.
    pub fn to_json(&self, index: usize) -> Result<Value> {
        match self {
            Parameter::Null => Ok(Value::Null),
            Parameter::Boolean(b) => Ok(Value::Bool(*b)),
            Parameter::Integer(i) => Ok(Value::from(*i)),
            Parameter::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .ok_or_else(|| ExasolError::InvalidParameter {
                    index,
                    message: "NaN and Infinity are not supported".to_string(),
                }),
            Parameter::String(s) => Ok(Value::String(s.clone())),
            Parameter::Binary(bytes) => Ok(Value::String(hex::encode_upper(bytes))),
            Parameter::Json(value) => Ok(value.clone()),
        }
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Boolean(value)
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Integer(value as i64)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Integer(value)
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Float(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::String(value.to_string())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::String(value)
    }
}

impl From<Vec<u8>> for Parameter {
    fn from(value: Vec<u8>) -> Self {
        Parameter::Binary(value)
    }
}

impl From<Value> for Parameter {
    fn from(value: Value) -> Self {
        Parameter::Json(value)
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map_or(Parameter::Null, Into::into)
    }
}

/// A server-side prepared statement.
///
/// Created by [`Driver::prepare`](crate::Driver::prepare). Every operation
/// takes the driver's connection for its duration and gives it back
/// afterwards, whether it succeeds or fails.
///
/// # Example
///
/// ```no_run
/// # use exadriver::{Driver, Parameter};
/// # async fn example(driver: &Driver) -> Result<(), Box<dyn std::error::Error>> {
/// let statement = driver.prepare("INSERT INTO T VALUES (?, ?)").await?;
///
/// // Two rows: (1, 'a') and (2, NULL)
/// let args: Vec<Parameter> = vec![1.into(), "a".into(), 2.into(), Parameter::Null];
/// statement.execute(args).await?;
///
/// statement.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Statement {
    connection: Connection,
    handle: i32,
    columns: Vec<Column>,
    limits: FetchLimits,
    closed: AtomicBool,
}

impl Statement {
    pub(crate) fn new(
        connection: Connection,
        handle: i32,
        columns: Vec<Column>,
        limits: FetchLimits,
    ) -> Self {
        Self {
            connection,
            handle,
            columns,
            limits,
            closed: AtomicBool::new(false),
        }
    }

    /// Server-side statement handle.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    /// Parameter columns reported by the server.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute with `args` laid out row by row.
    ///
    /// Argument `i` belongs to parameter column `i % columns`, so the number
    /// of arguments must be a multiple of the column count. A statement
    /// without parameters runs once and takes no arguments.
    ///
    /// # Errors
    ///
    /// - `InvalidValuesCount` if the argument count does not fit, before
    ///   anything is sent
    /// - `Closed` if the statement or its driver is closed
    /// - `Server` if the server rejects the execution
    pub async fn execute<I, P>(&self, args: I) -> Result<SqlResults>
    where
        I: IntoIterator<Item = P>,
        P: Into<Parameter>,
    {
        if self.is_closed() {
            return Err(ExasolError::Closed);
        }

        let args: Vec<Parameter> = args.into_iter().map(Into::into).collect();
        let (data, num_rows) = self.column_major(&args)?;

        let lease = self.connection.acquire().await?;
        let command = Command::ExecutePreparedStatement(ExecutePreparedStatementCommand {
            statement_handle: self.handle,
            num_columns: self.columns.len(),
            num_rows,
            columns: self.columns.clone(),
            data,
        });

        let response: Response<SqlResults> = lease.send_command(command).await?;
        fetch_remaining(&lease, response, self.limits).await?.into_result()
    }

    fn column_major(&self, args: &[Parameter]) -> Result<(Vec<Vec<Value>>, usize)> {
        let num_columns = self.columns.len();
        if num_columns == 0 {
            return if args.is_empty() {
                Ok((Vec::new(), 1))
            } else {
                Err(ExasolError::InvalidValuesCount)
            };
        }
        if args.len() % num_columns != 0 {
            return Err(ExasolError::InvalidValuesCount);
        }

        let num_rows = args.len() / num_columns;
        let mut data = vec![Vec::with_capacity(num_rows); num_columns];
        for (index, arg) in args.iter().enumerate() {
            data[index % num_columns].push(arg.to_json(index)?);
        }
        Ok((data, num_rows))
    }

    /// Release the statement on the server.
    ///
    /// The statement counts as closed afterwards even if the server reports
    /// an error. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let lease = self.connection.acquire().await?;
        let response: Response<Value> = lease
            .send_command(Command::ClosePreparedStatement(ClosePreparedStatementCommand {
                statement_handle: self.handle,
            }))
            .await?;

        match response.exception {
            Some(exception) => Err(ExasolError::Server(exception)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("connection", &self.connection.name())
            .field("handle", &self.handle)
            .field("columns", &self.columns.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
