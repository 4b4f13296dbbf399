//! Wire protocol: request/reply envelopes
//!
//! One JSON object per WebSocket text message, in both directions:
//!
//! ```text
//! → {"msgid": 7, "action": "set", "key": "eg.printers", "value": "{...}"}
//! ← {"msgid": 7, "content": true}
//! ← {"msgid": 8, "error": "No such action: frob"}
//! ```
//!
//! Incoming envelopes are parsed into a closed [`Request`] enum so every
//! action is matched exhaustively.

use crate::error::ProtocolError;
use crate::print::{Document, PrintSettings, DEFAULT_CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod engine;

pub use engine::{Session, SessionState};

/// Every action a client may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Keys,
    Printers,
    Print,
    PrintConfig,
    Get,
    Set,
    Append,
    Remove,
}

impl Action {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keys => "keys",
            Self::Printers => "printers",
            Self::Print => "print",
            Self::PrintConfig => "print-config",
            Self::Get => "get",
            Self::Set => "set",
            Self::Append => "append",
            Self::Remove => "remove",
        }
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keys" => Ok(Self::Keys),
            "printers" => Ok(Self::Printers),
            "print" => Ok(Self::Print),
            "print-config" => Ok(Self::PrintConfig),
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "append" => Ok(Self::Append),
            "remove" => Ok(Self::Remove),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A print job as requested by the client
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOrder {
    pub settings: PrintSettings,
    pub document: Document,
    /// Ask the user to confirm before printing
    pub show_dialog: bool,
}

/// A validated request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// List stored keys, optionally filtered by prefix
    Keys { prefix: Option<String> },
    /// Enumerate printers
    Printers,
    /// Print a document; replied to asynchronously
    Print(PrintOrder),
    /// Show/validate print settings and return the result
    PrintConfig { settings: PrintSettings },
    Get { key: String },
    Set { key: String, value: String },
    Append { key: String, value: String },
    Remove { key: String },
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Self::Keys { .. } => Action::Keys,
            Self::Printers => Action::Printers,
            Self::Print(_) => Action::Print,
            Self::PrintConfig { .. } => Action::PrintConfig,
            Self::Get { .. } => Action::Get,
            Self::Set { .. } => Action::Set,
            Self::Append { .. } => Action::Append,
            Self::Remove { .. } => Action::Remove,
        }
    }
}

/// A request together with its correlation token
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub msgid: Value,
    pub request: Request,
}

/// A message that could not be turned into a request
///
/// Carries whatever msgid could be recovered so the error reply can
/// still be correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub msgid: Value,
    pub error: ProtocolError,
}

impl Rejected {
    fn new(msgid: Value, error: ProtocolError) -> Self {
        Self { msgid, error }
    }

    /// The error reply for this rejection
    pub fn into_reply(self) -> Reply {
        Reply::failure(self.msgid, self.error)
    }
}

/// True if `msgid` is a usable correlation token
fn is_valid_msgid(msgid: &Value) -> bool {
    match msgid {
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Parse and validate one inbound message
pub fn parse_envelope(text: &str) -> Result<Envelope, Rejected> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Rejected::new(Value::Null, ProtocolError::InvalidJson(e.to_string())))?;

    let Value::Object(obj) = value else {
        return Err(Rejected::new(Value::Null, ProtocolError::NotAnObject));
    };

    let msgid = obj.get("msgid").cloned().unwrap_or(Value::Null);
    if !is_valid_msgid(&msgid) {
        return Err(Rejected::new(msgid, ProtocolError::MissingMsgid));
    }

    match parse_request(&obj) {
        Ok(request) => Ok(Envelope { msgid, request }),
        Err(error) => Err(Rejected::new(msgid, error)),
    }
}

fn parse_request(obj: &Map<String, Value>) -> Result<Request, ProtocolError> {
    let action: Action = non_empty_str(obj, "action")
        .ok_or(ProtocolError::MissingAction)?
        .parse()?;

    let key = || {
        non_empty_str(obj, "key")
            .map(str::to_string)
            .ok_or(ProtocolError::MissingKey)
    };
    let value = || match obj.get("value") {
        None | Some(Value::Null) => Err(ProtocolError::MissingValue),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
    };
    let settings = || match obj.get("config") {
        None | Some(Value::Null) => Err(ProtocolError::MissingConfig),
        Some(config) => PrintSettings::from_value(config),
    };

    let request = match action {
        Action::Keys => Request::Keys {
            prefix: non_empty_str(obj, "key").map(str::to_string),
        },
        Action::Printers => Request::Printers,
        Action::Print => {
            let settings = settings()?;
            let document = Document {
                content: obj.get("content").and_then(Value::as_str).map(str::to_string),
                content_type: non_empty_str(obj, "contentType")
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string(),
            };
            let show_dialog = obj
                .get("showDialog")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Request::Print(PrintOrder {
                settings,
                document,
                show_dialog,
            })
        }
        Action::PrintConfig => Request::PrintConfig {
            settings: settings()?,
        },
        Action::Get => Request::Get { key: key()? },
        Action::Set => Request::Set {
            key: key()?,
            value: value()?,
        },
        Action::Append => Request::Append {
            key: key()?,
            value: value()?,
        },
        Action::Remove => Request::Remove { key: key()? },
    };

    Ok(request)
}

/// Outbound reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Success { msgid: Value, content: Value },
    Failure { msgid: Value, error: Value },
}

impl Reply {
    pub fn success(msgid: Value, content: impl Into<Value>) -> Self {
        Self::Success {
            msgid,
            content: content.into(),
        }
    }

    pub fn failure(msgid: Value, error: impl fmt::Display) -> Self {
        Self::Failure {
            msgid,
            error: Value::String(error.to_string()),
        }
    }

    pub fn msgid(&self) -> &Value {
        match self {
            Self::Success { msgid, .. } | Self::Failure { msgid, .. } => msgid,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> String {
        // Reply holds only JSON values, which always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Reply channel back to one connection
///
/// Cheap to clone; the print worker holds one per queued job. Sending
/// after the connection closed fails quietly.
#[derive(Debug, Clone)]
pub struct Outbox {
    connection: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Create an outbox and the receiver that drains it onto the socket
    pub fn channel(connection: Uuid) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { connection, tx }, rx)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection
    }

    /// Queue `reply` for the client; returns false if the connection is gone
    pub fn send(&self, reply: &Reply) -> bool {
        let json = reply.to_json();
        if reply.is_success() {
            tracing::debug!(connection = %self.connection, reply = %json, "Replying");
        } else {
            tracing::warn!(connection = %self.connection, reply = %json, "Replying with error");
        }

        if self.tx.send(json).is_err() {
            tracing::warn!(
                connection = %self.connection,
                msgid = %reply.msgid(),
                "Connection closed; reply dropped"
            );
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
