//! Result set handling and pagination.
//!
//! Result sets arrive column-major and possibly incomplete. [`fetch_remaining`]
//! completes them with `fetch` commands on the same connection;
//! [`QueryResult`] offers row-oriented access to a completed result set.

use crate::connection::Connection;
use crate::error::{ExasolError, Result};
use crate::transport::messages::{
    Column, Command, FetchCommand, FetchResponse, ResultSetData, Response, SqlResults,
};
use crate::types::{ExasolType, TypeMapper};
use serde_json::{Map, Value};

/// Pagination limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Bytes requested per fetch round
    pub fetch_size: u64,
    /// Stop once this many rows are delivered
    pub max_rows: Option<u64>,
}

/// Complete every result set in `response`.
///
/// Rows keep their server order and already delivered rows are never
/// fetched again. Responses without data are returned unchanged.
pub async fn fetch_remaining(
    connection: &Connection,
    mut response: Response<SqlResults>,
    limits: FetchLimits,
) -> Result<Response<SqlResults>> {
    if let Some(results) = response.response_data.as_mut() {
        for result in results.results.iter_mut() {
            if let Some(result_set) = result.result_set.as_mut() {
                complete_result_set(connection, result_set, limits).await?;
            }
        }
    }
    Ok(response)
}

async fn complete_result_set(
    connection: &Connection,
    result_set: &mut ResultSetData,
    limits: FetchLimits,
) -> Result<()> {
    let target = match limits.max_rows {
        Some(max_rows) => result_set.num_rows.min(max_rows),
        None => result_set.num_rows,
    };

    let data = result_set
        .data
        .get_or_insert_with(|| vec![Vec::new(); result_set.columns.len()]);
    if data.len() != result_set.columns.len() {
        return Err(ExasolError::MalformedData);
    }
    let mut delivered = uniform_len(data)? as u64;

    while delivered < target {
        let handle = result_set
            .result_set_handle
            .ok_or(ExasolError::MalformedData)?;

        let fetched: FetchResponse = connection
            .send_command(Command::Fetch(FetchCommand {
                result_set_handle: handle,
                start_position: delivered,
                num_bytes: limits.fetch_size,
            }))
            .await?
            .into_result()?;

        tracing::trace!(
            handle,
            start = delivered,
            rows = fetched.num_rows,
            total = result_set.num_rows,
            "Fetched rows"
        );

        if fetched.num_rows == 0
            || fetched.data.len() != data.len()
            || fetched
                .data
                .iter()
                .any(|column| column.len() as u64 != fetched.num_rows)
        {
            return Err(ExasolError::MalformedData);
        }

        for (column, values) in data.iter_mut().zip(fetched.data) {
            column.extend(values);
        }
        delivered += fetched.num_rows;
    }

    for column in data.iter_mut() {
        column.truncate(target as usize);
    }
    result_set.num_rows_in_message = delivered.min(target);
    Ok(())
}

/// Row count shared by all columns.
fn uniform_len(data: &[Vec<Value>]) -> Result<usize> {
    let len = data.first().map_or(0, Vec::len);
    if data.iter().any(|column| column.len() != len) {
        return Err(ExasolError::MalformedData);
    }
    Ok(len)
}

/// A completed result set with row-oriented accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    columns: Vec<Column>,
    total_rows: u64,
    /// Column-major: `data[column][row]`
    data: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Wrap a result set, checking that every column holds the same number
    /// of rows.
    ///
    /// # Errors
    ///
    /// Returns `MalformedData` if the data does not match the columns.
    pub fn new(result_set: ResultSetData) -> Result<Self> {
        let data = result_set
            .data
            .unwrap_or_else(|| vec![Vec::new(); result_set.columns.len()]);
        if data.len() != result_set.columns.len() {
            return Err(ExasolError::MalformedData);
        }
        uniform_len(&data)?;

        Ok(Self {
            columns: result_set.columns,
            total_rows: result_set.num_rows,
            data,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_types(&self) -> Vec<ExasolType> {
        self.columns
            .iter()
            .map(|c| TypeMapper::from_data_type(&c.data_type))
            .collect()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows held, after any row cap.
    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Number of rows the server reported for the result set.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.column_index(name)
            .and_then(|i| self.data.get(i))
            .map(Vec::as_slice)
    }

    /// Value at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column_index(name)
            .and_then(|i| self.data.get(i))
            .and_then(|column| column.get(row))
    }

    pub fn row(&self, row: usize) -> Option<Vec<&Value>> {
        if row >= self.num_rows() {
            return None;
        }
        self.data.iter().map(|column| column.get(row)).collect()
    }

    /// Rows in row-major order.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        (0..self.num_rows())
            .filter_map(|row| self.row(row))
            .map(|values| values.into_iter().cloned().collect())
            .collect()
    }

    /// Rows as maps keyed by column name.
    pub fn row_maps(&self) -> Vec<Map<String, Value>> {
        (0..self.num_rows())
            .map(|row| {
                self.columns
                    .iter()
                    .zip(&self.data)
                    .filter_map(|(column, values)| Some((column.name.clone(), values.get(row)?.clone())))
                    .collect()
            })
            .collect()
    }

    /// The column-major data as delivered.
    pub fn into_columns(self) -> Vec<Vec<Value>> {
        self.data
    }
}
