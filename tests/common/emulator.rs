//! In-memory Exasol emulator speaking the WebSocket command protocol.
//!
//! Every transport created by the emulator is one session. Sessions share a
//! tiny table store, so rows inserted through one driver are visible to all
//! others. The login handshake is real: passwords are RSA-decrypted with the
//! emulator's private key.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use exadriver::transport::{
    Frame, MessageTransport, ReadyState, TransportEvent, TransportHandle, WireCodec,
};
use exadriver::{DriverConfig, TransportError};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

pub const USER: &str = "sys";
pub const PASSWORD: &str = "exasol";
pub const ACCESS_TOKEN: &str = "access-token";
pub const REFRESH_TOKEN: &str = "refresh-token";

fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

fn ok(data: Value) -> Value {
    json!({"status": "ok", "responseData": data})
}

fn sql_error(code: &str, text: impl Into<String>) -> Value {
    json!({"status": "error", "exception": {"sqlCode": code, "text": text.into()}})
}

/// Behaviour knobs of the emulator.
#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    /// Rows delivered with a result set and per fetch round
    pub rows_per_message: usize,
    /// Delay before each response is delivered
    pub latency: Duration,
    /// Whether `disconnect` is answered at all
    pub answer_disconnect: bool,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            rows_per_message: 1000,
            latency: Duration::ZERO,
            answer_disconnect: true,
        }
    }
}

struct Table {
    columns: Vec<(String, Value)>,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct Store {
    schemas: HashSet<String>,
    tables: HashMap<String, Table>,
    /// Column-major data of open result sets
    result_sets: HashMap<i32, Vec<Vec<Value>>>,
    prepared: HashMap<i32, String>,
    next_handle: i32,
}

enum Outcome {
    RowCount(u64),
    ResultSet {
        columns: Vec<(String, Value)>,
        rows: Vec<Vec<Value>>,
    },
}

type SqlResult = Result<Outcome, Value>;

struct Shared {
    options: EmulatorOptions,
    store: Mutex<Store>,
    commands: Mutex<Vec<String>>,
    sessions: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Handle to a running emulator; clones share the same database.
#[derive(Clone)]
pub struct Emulator {
    shared: Arc<Shared>,
}

impl Emulator {
    pub fn new() -> Self {
        Self::with_options(EmulatorOptions::default())
    }

    pub fn with_options(options: EmulatorOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                store: Mutex::new(Store {
                    next_handle: 1,
                    ..Default::default()
                }),
                commands: Mutex::new(Vec::new()),
                sessions: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Driver configuration with valid basic-auth credentials.
    pub fn config(&self) -> DriverConfig {
        DriverConfig::builder()
            .host("emulator")
            .user(USER)
            .password(PASSWORD)
            .encryption(false)
            .build()
            .unwrap()
    }

    /// Factory opening a new session per call.
    pub fn factory(&self) -> impl Fn(&str) -> TransportHandle + Send + Sync + 'static {
        let emulator = self.clone();
        move |_url: &str| emulator.open()
    }

    pub fn open(&self) -> TransportHandle {
        self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        let (events, rx) = mpsc::unbounded_channel();
        events.send(TransportEvent::Open).unwrap();

        let session = Arc::new(Session {
            shared: Arc::clone(&self.shared),
            state: Mutex::new(ReadyState::Open),
            stage: Mutex::new(Stage::Fresh),
            events,
        });
        TransportHandle::new(session, rx)
    }

    /// Number of sessions opened so far.
    pub fn sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::SeqCst)
    }

    /// Highest number of statements executing at the same time.
    pub fn peak_active(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Names of all received commands, login payloads as `"-"`.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Create `table` with one integer column `X` holding `0..rows`.
    pub fn seed(&self, table: &str, rows: u64) {
        let mut store = self.shared.store.lock().unwrap();
        store.tables.insert(
            table.to_uppercase(),
            Table {
                columns: vec![("X".to_string(), decimal())],
                rows: (0..rows).map(|i| vec![json!(i)]).collect(),
            },
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fresh,
    AwaitCredentials,
    AwaitToken,
    Ready,
}

struct Session {
    shared: Arc<Shared>,
    state: Mutex<ReadyState>,
    stage: Mutex<Stage>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl MessageTransport for Session {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if *self.state.lock().unwrap() != ReadyState::Open {
            return Err(TransportError::SendError("session closed".to_string()));
        }

        let codec = WireCodec::new(matches!(frame, Frame::Binary(_)));
        let request: Value = codec.decode(&frame)?;
        let name = request
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        self.shared.commands.lock().unwrap().push(name.clone());

        let counted = matches!(name.as_str(), "execute" | "executeBatch" | "executePreparedStatement");
        if counted {
            let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.peak.fetch_max(active, Ordering::SeqCst);
        }

        let response = self.handle(&name, &request);
        let Some(response) = response else {
            return Ok(());
        };
        let frame = codec.encode(&response)?;

        let latency = self.shared.options.latency;
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);
        let deliver = move || {
            if counted {
                shared.active.fetch_sub(1, Ordering::SeqCst);
            }
            let _ = events.send(TransportEvent::Message(frame));
        };
        if latency.is_zero() {
            deliver();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                deliver();
            });
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != ReadyState::Closed {
            *state = ReadyState::Closed;
            let _ = self.events.send(TransportEvent::Close);
        }
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock().unwrap()
    }
}

impl Session {
    fn handle(&self, name: &str, request: &Value) -> Option<Value> {
        let mut stage = self.stage.lock().unwrap();
        match (*stage, name) {
            (Stage::Fresh, "login") => {
                *stage = Stage::AwaitCredentials;
                let key = private_key();
                Some(ok(json!({
                    "publicKeyModulus": hex::encode(key.n().to_bytes_be()),
                    "publicKeyExponent": hex::encode(key.e().to_bytes_be()),
                })))
            }
            (Stage::Fresh, "loginToken") => {
                *stage = Stage::AwaitToken;
                Some(json!({"status": "ok"}))
            }
            (Stage::AwaitCredentials, "-") => {
                if check_password(request) {
                    *stage = Stage::Ready;
                    Some(ok(session_info()))
                } else {
                    *stage = Stage::Fresh;
                    Some(sql_error("08004", "Connection exception - authentication failed."))
                }
            }
            (Stage::AwaitToken, "-") => {
                let token = request
                    .get("refreshToken")
                    .or_else(|| request.get("accessToken"))
                    .and_then(Value::as_str);
                if matches!(token, Some(ACCESS_TOKEN) | Some(REFRESH_TOKEN)) {
                    *stage = Stage::Ready;
                    Some(ok(session_info()))
                } else {
                    *stage = Stage::Fresh;
                    Some(sql_error("08004", "Connection exception - invalid token."))
                }
            }
            (_, "disconnect") => self
                .shared
                .options
                .answer_disconnect
                .then(|| json!({"status": "ok"})),
            (_, "abortQuery") => None,
            (Stage::Ready, _) => Some(self.command(name, request)),
            _ => Some(sql_error("08004", "Not logged in")),
        }
    }

    fn command(&self, name: &str, request: &Value) -> Value {
        let mut store = self.shared.store.lock().unwrap();
        let rows_per_message = self.shared.options.rows_per_message;

        match name {
            "execute" => {
                let sql = request["sqlText"].as_str().unwrap_or_default();
                match store.execute(sql) {
                    Ok(outcome) => results(vec![store.render(outcome, rows_per_message)]),
                    Err(e) => e,
                }
            }
            "executeBatch" => {
                let mut rendered = Vec::new();
                for sql in request["sqlTexts"].as_array().cloned().unwrap_or_default() {
                    match store.execute(sql.as_str().unwrap_or_default()) {
                        Ok(outcome) => rendered.push(store.render(outcome, rows_per_message)),
                        Err(e) => return e,
                    }
                }
                results(rendered)
            }
            "fetch" => {
                let handle = request["resultSetHandle"].as_i64().unwrap_or_default() as i32;
                let start = request["startPosition"].as_u64().unwrap_or_default() as usize;
                let Some(data) = store.result_sets.get(&handle) else {
                    return sql_error("00000", "Unknown result set handle");
                };
                let total = data.first().map_or(0, Vec::len);
                let end = (start + rows_per_message).min(total);
                let page: Vec<Vec<Value>> = data
                    .iter()
                    .map(|column| column[start.min(end)..end].to_vec())
                    .collect();
                ok(json!({"numRows": end - start.min(end), "data": page}))
            }
            "createPreparedStatement" => {
                let sql = request["sqlText"].as_str().unwrap_or_default().to_string();
                match store.parameter_columns(&sql) {
                    Ok(columns) => {
                        let handle = store.next_handle();
                        store.prepared.insert(handle, sql);
                        ok(json!({
                            "statementHandle": handle,
                            "parameterData": {
                                "numColumns": columns.len(),
                                "columns": columns
                                    .iter()
                                    .map(|(name, data_type)| json!({"name": name, "dataType": data_type}))
                                    .collect::<Vec<_>>()
                            }
                        }))
                    }
                    Err(e) => e,
                }
            }
            "executePreparedStatement" => {
                let handle = request["statementHandle"].as_i64().unwrap_or_default() as i32;
                let Some(sql) = store.prepared.get(&handle).cloned() else {
                    return sql_error("00000", "Unknown statement handle");
                };
                let num_rows = request["numRows"].as_u64().unwrap_or_default() as usize;
                let data: Vec<Vec<Value>> =
                    serde_json::from_value(request["data"].clone()).unwrap_or_default();
                match store.execute_prepared(&sql, &data, num_rows) {
                    Ok(outcome) => results(vec![store.render(outcome, rows_per_message)]),
                    Err(e) => e,
                }
            }
            "closePreparedStatement" => {
                let handle = request["statementHandle"].as_i64().unwrap_or_default() as i32;
                match store.prepared.remove(&handle) {
                    Some(_) => json!({"status": "ok"}),
                    None => sql_error("00000", "Unknown statement handle"),
                }
            }
            other => sql_error("00000", format!("Unsupported command {}", other)),
        }
    }
}

fn check_password(request: &Value) -> bool {
    let Some(encoded) = request["password"].as_str() else {
        return false;
    };
    let Ok(ciphertext) = STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(plaintext) = private_key().decrypt(Pkcs1v15Encrypt, &ciphertext) else {
        return false;
    };
    request["username"] == USER && plaintext == PASSWORD.as_bytes()
}

fn session_info() -> Value {
    json!({
        "sessionId": 1_700_000_000_001u64,
        "protocolVersion": 3,
        "releaseVersion": "8.0.0",
        "databaseName": "EMULATOR",
        "productName": "Exasol DB",
        "maxDataMessageSize": 4_194_304,
        "maxIdentifierLength": 128,
        "maxVarcharLength": 2_000_000,
        "identifierQuoteString": "\"",
        "timeZone": "UTC",
        "timeZoneBehavior": "INVALID SHIFT AMBIGUOUS ST"
    })
}

fn results(results: Vec<Value>) -> Value {
    ok(json!({"numResults": results.len(), "results": results}))
}

fn decimal() -> Value {
    json!({"type": "DECIMAL", "precision": 18, "scale": 0})
}

fn data_type(sql_type: &str) -> Value {
    let upper = sql_type.trim().to_uppercase();
    if upper.starts_with("VARCHAR") || upper.starts_with("CHAR") {
        let size: u64 = upper
            .split(|c: char| c == '(' || c == ')')
            .nth(1)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(2_000_000);
        json!({"type": "VARCHAR", "size": size, "characterSet": "UTF8"})
    } else if upper.starts_with("DOUBLE") || upper.starts_with("FLOAT") {
        json!({"type": "DOUBLE"})
    } else if upper.starts_with("BOOL") {
        json!({"type": "BOOLEAN"})
    } else {
        decimal()
    }
}

/// Split on `separator` outside of quotes and parentheses.
fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            c if c == separator && !quoted && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn literal(text: &str) -> Value {
    let text = text.trim();
    if text.eq_ignore_ascii_case("NULL") {
        Value::Null
    } else if text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2 {
        Value::String(text[1..text.len() - 1].replace("''", "'"))
    } else if let Ok(i) = text.parse::<i64>() {
        json!(i)
    } else if let Ok(f) = text.parse::<f64>() {
        json!(f)
    } else if text.eq_ignore_ascii_case("TRUE") || text.eq_ignore_ascii_case("FALSE") {
        Value::Bool(text.eq_ignore_ascii_case("TRUE"))
    } else {
        Value::String(text.to_string())
    }
}

/// Text between the parentheses of each `( ... )` group.
fn tuples(text: &str) -> Vec<String> {
    split_top_level(text, ',')
        .into_iter()
        .map(|t| t.trim().trim_start_matches('(').trim_end_matches(')').to_string())
        .collect()
}

fn syntax_error(sql: &str) -> Value {
    sql_error("42000", format!("syntax error, unexpected statement [{}]", sql))
}

impl Store {
    fn next_handle(&mut self) -> i32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn table(&mut self, name: &str) -> Result<&mut Table, Value> {
        let name = name.trim().to_uppercase();
        self.tables
            .get_mut(&name)
            .ok_or_else(|| sql_error("42000", format!("object {} not found", name)))
    }

    fn execute(&mut self, sql: &str) -> SqlResult {
        let sql = sql.trim().trim_end_matches(';');
        let upper = sql.to_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();

        match words.as_slice() {
            ["CREATE", "SCHEMA", name, ..] => {
                if !self.schemas.insert(name.to_string()) {
                    return Err(sql_error("42500", format!("schema {} already exists", name)));
                }
                Ok(Outcome::RowCount(0))
            }
            ["CREATE", "TABLE", ..] => self.create_table(sql),
            ["INSERT", "INTO", ..] => self.insert(sql),
            ["SELECT", ..] => self.select(sql),
            ["DELETE", "FROM", name, ..] => {
                let table = self.table(name)?;
                let deleted = table.rows.len() as u64;
                table.rows.clear();
                Ok(Outcome::RowCount(deleted))
            }
            ["DROP", "TABLE", name, ..] => {
                self.tables.remove(*name);
                Ok(Outcome::RowCount(0))
            }
            ["DROP", "SCHEMA", name, ..] => {
                let prefix = format!("{}.", name);
                self.tables.retain(|table, _| !table.starts_with(&prefix));
                self.schemas.remove(*name);
                Ok(Outcome::RowCount(0))
            }
            ["COMMIT"] | ["ROLLBACK"] | ["OPEN", "SCHEMA", ..] => Ok(Outcome::RowCount(0)),
            _ => Err(syntax_error(sql)),
        }
    }

    fn create_table(&mut self, sql: &str) -> SqlResult {
        let (Some(open), Some(close)) = (sql.find('('), sql.rfind(')')) else {
            return Err(syntax_error(sql));
        };
        let name = sql["CREATE TABLE".len()..open].trim().to_uppercase();
        if let Some((schema, _)) = name.split_once('.') {
            if !self.schemas.contains(schema) {
                return Err(sql_error("42000", format!("schema {} not found", schema)));
            }
        }
        if self.tables.contains_key(&name) {
            return Err(sql_error("42500", format!("table {} already exists", name)));
        }

        let columns = split_top_level(&sql[open + 1..close], ',')
            .iter()
            .filter_map(|definition| {
                let (column, sql_type) = definition.split_once(char::is_whitespace)?;
                Some((column.to_uppercase(), data_type(sql_type)))
            })
            .collect();
        self.tables.insert(
            name,
            Table {
                columns,
                rows: Vec::new(),
            },
        );
        Ok(Outcome::RowCount(0))
    }

    fn insert_target<'a>(&self, sql: &'a str) -> Option<(String, &'a str)> {
        let upper = sql.to_uppercase();
        let into = upper.find("INTO")? + "INTO".len();
        let values = upper.find("VALUES")?;
        Some((
            sql[into..values].trim().to_uppercase(),
            &sql[values + "VALUES".len()..],
        ))
    }

    fn insert(&mut self, sql: &str) -> SqlResult {
        let (name, values) = self.insert_target(sql).ok_or_else(|| syntax_error(sql))?;
        let table = self.table(&name)?;

        let mut rows = Vec::new();
        for tuple in tuples(values) {
            let row: Vec<Value> = split_top_level(&tuple, ',').iter().map(|v| literal(v)).collect();
            if row.len() != table.columns.len() {
                return Err(sql_error("42000", "number of values does not match columns"));
            }
            rows.push(row);
        }
        let inserted = rows.len() as u64;
        table.rows.extend(rows);
        Ok(Outcome::RowCount(inserted))
    }

    fn select(&mut self, sql: &str) -> SqlResult {
        let upper = sql.to_uppercase();
        let Some(from) = upper.find(" FROM ") else {
            // SELECT <literals>
            let values = split_top_level(&sql["SELECT".len()..], ',');
            let columns = values
                .iter()
                .map(|v| (v.to_uppercase(), decimal()))
                .collect();
            let rows = vec![values.iter().map(|v| literal(v)).collect()];
            return Ok(Outcome::ResultSet { columns, rows });
        };

        let projection = sql["SELECT".len()..from].trim().to_uppercase();
        let name = upper[from + " FROM ".len()..]
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        let table = self.table(&name)?;

        let indices: Vec<usize> = if projection == "*" {
            (0..table.columns.len()).collect()
        } else {
            let mut indices = Vec::new();
            for column in split_top_level(&projection, ',') {
                let index = table
                    .columns
                    .iter()
                    .position(|(name, _)| *name == column)
                    .ok_or_else(|| sql_error("42000", format!("object {} not found", column)))?;
                indices.push(index);
            }
            indices
        };

        Ok(Outcome::ResultSet {
            columns: indices.iter().map(|&i| table.columns[i].clone()).collect(),
            rows: table
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    fn parameter_columns(&mut self, sql: &str) -> Result<Vec<(String, Value)>, Value> {
        let markers = sql.matches('?').count();
        if markers == 0 {
            return Ok(Vec::new());
        }
        let (name, _) = self.insert_target(sql).ok_or_else(|| syntax_error(sql))?;
        let table = self.table(&name)?;
        if table.columns.len() != markers {
            return Err(sql_error("42000", "number of parameters does not match columns"));
        }
        Ok(table.columns.clone())
    }

    fn execute_prepared(&mut self, sql: &str, data: &[Vec<Value>], num_rows: usize) -> SqlResult {
        if data.is_empty() {
            return self.execute(sql);
        }
        let (name, _) = self.insert_target(sql).ok_or_else(|| syntax_error(sql))?;
        let table = self.table(&name)?;
        if data.len() != table.columns.len() || data.iter().any(|column| column.len() != num_rows) {
            return Err(sql_error("42000", "malformed parameter data"));
        }
        for row in 0..num_rows {
            table.rows.push(data.iter().map(|column| column[row].clone()).collect());
        }
        Ok(Outcome::RowCount(num_rows as u64))
    }

    fn render(&mut self, outcome: Outcome, rows_per_message: usize) -> Value {
        match outcome {
            Outcome::RowCount(count) => json!({"resultType": "rowCount", "rowCount": count}),
            Outcome::ResultSet { columns, rows } => {
                let total = rows.len();
                let data: Vec<Vec<Value>> = (0..columns.len())
                    .map(|c| rows.iter().map(|row| row[c].clone()).collect())
                    .collect();

                let delivered = total.min(rows_per_message);
                let mut result_set = json!({
                    "numColumns": columns.len(),
                    "numRows": total,
                    "numRowsInMessage": delivered,
                    "columns": columns
                        .iter()
                        .map(|(name, data_type)| json!({"name": name, "dataType": data_type}))
                        .collect::<Vec<_>>(),
                    "data": data.iter().map(|column| column[..delivered].to_vec()).collect::<Vec<_>>(),
                });
                if delivered < total {
                    let handle = self.next_handle();
                    self.result_sets.insert(handle, data);
                    result_set["resultSetHandle"] = json!(handle);
                }
                json!({"resultType": "resultSet", "resultSet": result_set})
            }
        }
    }
}
