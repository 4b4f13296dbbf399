//! Error types for a3s-hatch
//!
//! Each concern has its own error enum. Only `HatchError` crosses the
//! process boundary; protocol, storage, and print failures are always
//! turned into replies before they reach a connection.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Malformed or incomplete request envelopes
///
/// The `Display` text of each variant is sent verbatim to the client
/// as the `error` member of the reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid WebSockets JSON message: {0}")]
    InvalidJson(String),

    #[error("WebSockets message is not a JSON object")]
    NotAnObject,

    #[error("No msgid specified in request")]
    MissingMsgid,

    #[error("No action specified in request")]
    MissingAction,

    #[error("No such action: {0}")]
    UnknownAction(String),

    #[error("No key specified in request")]
    MissingKey,

    #[error("No value specified in request")]
    MissingValue,

    #[error("No config specified in request")]
    MissingConfig,

    #[error("Invalid print config: {0}")]
    InvalidConfig(String),

    #[error("Error JSON-parsing stored value for key: {0}")]
    InvalidStoredValue(String),
}

/// Connection refused at handshake time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    #[error("no Origin header in request")]
    MissingOrigin,

    #[error("request from un-trusted domain: {0}")]
    Untrusted(String),
}

/// Filesystem faults inside the key store
///
/// These never leave `KeyStore`; they are logged and mapped to a
/// boolean or absent result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key '{0}' does not name a file inside the sandbox")]
    InvalidKey(String),

    #[error("unable to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Printing failures reported back to the client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrintError {
    #[error("No such printer: {0}")]
    NoSuchPrinter(String),

    #[error("No default printer available")]
    NoDefaultPrinter,

    #[error("Print job canceled by user")]
    Cancelled,

    #[error("No content specified for print job")]
    MissingContent,

    #[error("Print failed: {0}")]
    Render(String),

    #[error("Print service unavailable")]
    Unavailable,

    #[error("Print worker failed: {0}")]
    WorkerPanic(String),

    /// The worker did not answer in time, usually because a job is stuck
    #[error("Print service busy: no response within {}s", .0.as_secs_f32())]
    Busy(Duration),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Top-level error for bootstrap, configuration, and serving
#[derive(Debug, Error)]
pub enum HatchError {
    /// Configuration file missing, unreadable, or invalid
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener or accept-loop failure
    #[error("server error: {0}")]
    Server(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Print(#[from] PrintError),
}

/// Result type alias for hatch operations
pub type Result<T> = std::result::Result<T, HatchError>;
