//! Wire shapes for the kernel channel.
//!
//! Inbound messages are JSON tuples `[action, code | payload, contextId, requestId?]`.
//! Outbound frames are JSON objects, except correlator requests which reuse
//! the tuple shape so the front-end can answer them with a `reply`.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use tokio::sync::mpsc;
use tracing::warn;

use super::error::{ProtocolError, ProtocolResult};
use crate::inspect::Inspection;

/// Action name used for correlator requests and their replies.
pub const REQUEST_ACTION: &str = "request";

/// Inbound action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// List property names of the evaluated value.
    GetAllPropertyNames,
    /// Describe the evaluated value.
    Inspect,
    /// Evaluate code and deliver its result.
    Run,
    /// Answer a pending correlator request.
    Reply,
    /// Anything else; rejected by the dispatcher.
    Other(String),
}

impl Action {
    /// Parse an action name.
    pub fn parse(name: &str) -> Self {
        match name {
            "getAllPropertyNames" => Action::GetAllPropertyNames,
            "inspect" => Action::Inspect,
            "run" => Action::Run,
            "reply" => Action::Reply,
            other => Action::Other(other.to_string()),
        }
    }

    /// Wire name of the action.
    pub fn as_str(&self) -> &str {
        match self {
            Action::GetAllPropertyNames => "getAllPropertyNames",
            Action::Inspect => "inspect",
            Action::Run => "run",
            Action::Reply => "reply",
            Action::Other(name) => name,
        }
    }
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Routed action.
    pub action: Action,
    /// Slot 1: source text, or the reply payload for `reply`.
    pub body: JsonValue,
    /// Target context.
    pub context_id: String,
    /// Slot 3: correlator id, only meaningful for `reply`.
    pub request_id: Option<u64>,
}

impl Message {
    /// Build a code-carrying message.
    pub fn new(action: Action, code: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            action,
            body: JsonValue::String(code.into()),
            context_id: context_id.into(),
            request_id: None,
        }
    }

    /// Build a `reply` message.
    pub fn reply(payload: JsonValue, context_id: impl Into<String>, request_id: u64) -> Self {
        Self {
            action: Action::Reply,
            body: payload,
            context_id: context_id.into(),
            request_id: Some(request_id),
        }
    }

    /// Decode one line of input.
    pub fn decode(line: &str) -> ProtocolResult<Self> {
        let value: JsonValue = serde_json::from_str(line)?;
        Self::from_json(value)
    }

    /// Decode an already-parsed JSON tuple.
    pub fn from_json(value: JsonValue) -> ProtocolResult<Self> {
        let JsonValue::Array(mut slots) = value else {
            return Err(ProtocolError::Shape("expected a JSON array".to_string()));
        };
        if slots.len() < 3 {
            return Err(ProtocolError::Shape(format!(
                "expected at least 3 slots, got {}",
                slots.len()
            )));
        }
        let action = match &slots[0] {
            JsonValue::String(name) => Action::parse(name),
            other => {
                return Err(ProtocolError::Shape(format!(
                    "action must be a string, got {other}"
                )));
            }
        };
        let context_id = match &slots[2] {
            JsonValue::String(id) => id.clone(),
            JsonValue::Number(id) => id.to_string(),
            other => {
                return Err(ProtocolError::Shape(format!(
                    "context id must be a string, got {other}"
                )));
            }
        };
        let request_id = slots.get(3).and_then(JsonValue::as_u64);
        let body = std::mem::take(&mut slots[1]);
        Ok(Self {
            action,
            body,
            context_id,
            request_id,
        })
    }

    /// Source text carried in slot 1.
    pub fn code(&self) -> ProtocolResult<&str> {
        self.body.as_str().ok_or_else(|| {
            ProtocolError::Shape(format!(
                "{} expects source text, got {}",
                self.action.as_str(),
                self.body
            ))
        })
    }

    /// Re-encode as a JSON tuple.
    pub fn to_json(&self) -> JsonValue {
        let mut slots = vec![
            JsonValue::String(self.action.as_str().to_string()),
            self.body.clone(),
            JsonValue::String(self.context_id.clone()),
        ];
        if let Some(id) = self.request_id {
            slots.push(json!(id));
        }
        JsonValue::Array(slots)
    }
}

/// MIME-keyed display payload.
pub type MimeBundle = JsonMap<String, JsonValue>;

/// Error description carried by an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error class name.
    pub ename: String,
    /// Error message.
    pub evalue: String,
    /// Formatted trace lines.
    pub traceback: Vec<String>,
}

impl ErrorPayload {
    /// Build a payload whose traceback is the single `ename: evalue` line.
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        let ename = ename.into();
        let evalue = evalue.into();
        let traceback = vec![format!("{ename}: {evalue}")];
        Self {
            ename,
            evalue,
            traceback,
        }
    }
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Startup liveness signal.
    Online,
    /// Answer to `getAllPropertyNames`.
    Names {
        /// Context id
        id: String,
        /// Property names
        names: Vec<String>,
    },
    /// Answer to `inspect`.
    Inspection {
        /// Context id
        id: String,
        /// Inspection result
        inspection: Inspection,
    },
    /// Terminal result of a run.
    Result {
        /// Context id
        id: String,
        /// Display encodings of the value
        mime: MimeBundle,
    },
    /// Terminal error.
    Error {
        /// Context id
        id: String,
        /// Error description
        error: ErrorPayload,
    },
    /// Console output of evaluated code.
    Stdout {
        /// Context id
        id: String,
        /// Written text
        text: String,
    },
    /// Correlator request awaiting a `reply`.
    Request {
        /// Context id
        context_id: String,
        /// Correlation id
        request_id: u64,
        /// Request payload
        payload: JsonValue,
    },
    /// Process-level fault.
    Stderr(String),
    /// Debug log mirror.
    Log(String),
}

impl Frame {
    /// JSON representation written to the channel.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Frame::Online => json!({ "status": "online" }),
            Frame::Names { id, names } => json!({ "id": id, "names": names, "end": true }),
            Frame::Inspection { id, inspection } => {
                json!({ "id": id, "inspection": inspection, "end": true })
            }
            Frame::Result { id, mime } => json!({ "id": id, "mime": mime, "end": true }),
            Frame::Error { id, error } => json!({ "id": id, "error": error, "end": true }),
            Frame::Stdout { id, text } => json!({ "id": id, "stdout": text }),
            Frame::Request {
                context_id,
                request_id,
                payload,
            } => json!([REQUEST_ACTION, payload, context_id, request_id]),
            Frame::Stderr(text) => json!({ "stderr": text }),
            Frame::Log(text) => json!({ "log": format!("SERVER: {text}") }),
        }
    }

    /// Encode as one line of output (without the trailing newline).
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }
}

/// Sending half of the outbound channel, shared by every context.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Create an outbox and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame. Frames sent after the writer has gone away are dropped.
    pub fn send(&self, frame: Frame) {
        if let Err(err) = self.tx.send(frame) {
            warn!(frame = ?err.0, "outbound channel closed; dropping frame");
        }
    }
}
