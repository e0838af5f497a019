//! In-memory scripted server used by unit tests.

use crate::error::TransportError;
use crate::transport::{Frame, MessageTransport, ReadyState, TransportEvent, TransportHandle, WireCodec};
use async_trait::async_trait;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

type Handler = Box<dyn FnMut(&Value) -> Option<Value> + Send>;

pub(crate) fn ok(data: Value) -> Value {
    json!({"status": "ok", "responseData": data})
}

pub(crate) fn sql_error(code: &str, text: &str) -> Value {
    json!({"status": "error", "exception": {"sqlCode": code, "text": text}})
}

pub(crate) fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub(crate) fn public_key() -> Value {
    let key = private_key();
    json!({
        "publicKeyModulus": hex::encode(key.n().to_bytes_be()),
        "publicKeyExponent": hex::encode(key.e().to_bytes_be()),
    })
}

pub(crate) fn session_info() -> Value {
    json!({
        "sessionId": 42,
        "protocolVersion": 3,
        "releaseVersion": "7.1.0",
        "databaseName": "TESTDB",
        "productName": "EXASolution",
        "maxDataMessageSize": 4194304,
        "timeZone": "UTC"
    })
}

/// Answers the login handshake and `disconnect`; everything else goes to `handler`.
pub(crate) fn with_login<F>(mut handler: F) -> impl FnMut(&Value) -> Option<Value> + Send + 'static
where
    F: FnMut(&Value) -> Option<Value> + Send + 'static,
{
    move |request: &Value| match request.get("command").and_then(Value::as_str) {
        Some("login") => Some(ok(public_key())),
        Some("loginToken") => Some(json!({"status": "ok"})),
        Some("disconnect") => Some(json!({"status": "ok"})),
        Some("abortQuery") => None,
        Some(_) => handler(request),
        None => Some(ok(session_info())),
    }
}

pub(crate) fn row_count_result(count: u64) -> Value {
    ok(json!({"numResults": 1, "results": [{"resultType": "rowCount", "rowCount": count}]}))
}

/// A result set response with `delivered` of `total` integer rows in one column.
pub(crate) fn int_result_set(handle: i32, total: u64, delivered: u64) -> Value {
    let values: Vec<u64> = (0..delivered).collect();
    ok(json!({
        "numResults": 1,
        "results": [{
            "resultType": "resultSet",
            "resultSet": {
                "resultSetHandle": handle,
                "numColumns": 1,
                "numRows": total,
                "numRowsInMessage": delivered,
                "columns": [{"name": "X", "dataType": {"type": "DECIMAL", "precision": 18, "scale": 0}}],
                "data": [values]
            }
        }]
    }))
}

/// Scripted transport: every sent request is recorded and answered by a handler.
pub(crate) struct ScriptedServer {
    state: Mutex<ReadyState>,
    events: mpsc::UnboundedSender<TransportEvent>,
    handler: Mutex<Handler>,
    received: Mutex<Vec<Value>>,
    compressed: Mutex<bool>,
}

impl ScriptedServer {
    /// Start an open server; the returned handle already carries the `Open` event.
    pub(crate) fn start(
        handler: impl FnMut(&Value) -> Option<Value> + Send + 'static,
    ) -> (Arc<Self>, TransportHandle) {
        let (events, rx) = mpsc::unbounded_channel();
        events.send(TransportEvent::Open).unwrap();

        let server = Arc::new(Self {
            state: Mutex::new(ReadyState::Open),
            events,
            handler: Mutex::new(Box::new(handler)),
            received: Mutex::new(Vec::new()),
            compressed: Mutex::new(false),
        });
        let transport: Arc<dyn MessageTransport> = server.clone();
        (server, TransportHandle::new(transport, rx))
    }

    pub(crate) fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Command names of all received requests; login payloads show as `"-"`.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|r| r.get("command").and_then(Value::as_str).unwrap_or("-").to_string())
            .collect()
    }

    pub(crate) fn received_compressed(&self) -> bool {
        *self.compressed.lock().unwrap()
    }

    pub(crate) fn set_handler(&self, handler: impl FnMut(&Value) -> Option<Value> + Send + 'static) {
        *self.handler.lock().unwrap() = Box::new(handler);
    }

    pub(crate) fn set_ready_state(&self, state: ReadyState) {
        *self.state.lock().unwrap() = state;
    }

    /// Push a plain-text response.
    pub(crate) fn reply(&self, response: &Value) {
        let frame = WireCodec::new(self.received_compressed()).encode(response).unwrap();
        self.inject(TransportEvent::Message(frame));
    }

    pub(crate) fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MessageTransport for ScriptedServer {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if *self.state.lock().unwrap() != ReadyState::Open {
            return Err(TransportError::SendError("not open".to_string()));
        }

        let compressed = matches!(frame, Frame::Binary(_));
        *self.compressed.lock().unwrap() = compressed;
        let codec = WireCodec::new(compressed);
        let request: Value = codec.decode(&frame)?;
        self.received.lock().unwrap().push(request.clone());

        let response = (self.handler.lock().unwrap())(&request);
        if let Some(response) = response {
            self.inject(TransportEvent::Message(codec.encode(&response)?));
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
