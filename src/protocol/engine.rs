//! Per-connection protocol engine
//!
//! A `Session` exists only for connections the trust gate admitted, so
//! holding one means the connection is active. Messages are handled one
//! at a time in arrival order; each is independent of the others.

use super::{parse_envelope, Outbox, PrintOrder, Reply, Request};
use crate::error::{ProtocolError, TrustError};
use crate::print::bridge::{PrintBridge, PrintRequest};
use crate::print::PrintSettings;
use crate::store::KeyStore;
use crate::trust::{Handshake, TrustGate};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

/// Lifecycle of an admitted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed,
}

/// Protocol state for one trusted connection
pub struct Session {
    id: Uuid,
    origin: String,
    store: KeyStore,
    printer: PrintBridge,
    outbox: Outbox,
    state: SessionState,
}

impl Session {
    /// Admit a connection through `gate`
    ///
    /// Untrusted connections get no session at all; the caller must tear
    /// them down without reading any message.
    pub fn open(
        gate: &TrustGate,
        handshake: &Handshake,
        profile_dir: &Path,
        printer: PrintBridge,
        outbox: Outbox,
    ) -> Result<Self, TrustError> {
        let origin = gate.admit(handshake)?;
        let id = outbox.connection_id();

        tracing::info!(
            connection = %id,
            remote = %handshake.remote,
            origin = %origin,
            "Session opened"
        );

        Ok(Self {
            id,
            store: KeyStore::new(profile_dir, &origin),
            origin,
            printer,
            outbox,
            state: SessionState::Active,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The trusted origin declared at handshake
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// This connection's reply channel
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Mark the session closed; later messages are ignored
    pub fn close(&mut self) {
        if self.state == SessionState::Active {
            tracing::info!(connection = %self.id, origin = %self.origin, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Handle one inbound text message
    ///
    /// Returns the synchronous reply, or `None` when there is none to
    /// send: the session is closed, or the request is a `print` whose
    /// reply comes later from the print worker.
    pub async fn handle_message(&self, text: &str) -> Option<Reply> {
        if self.state == SessionState::Closed {
            tracing::debug!(connection = %self.id, "Message on closed session ignored");
            return None;
        }

        let envelope = match parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(rejected) => {
                tracing::warn!(
                    connection = %self.id,
                    msgid = %rejected.msgid,
                    error = %rejected.error,
                    "Rejected request"
                );
                return Some(rejected.into_reply());
            }
        };

        tracing::info!(
            connection = %self.id,
            msgid = %envelope.msgid,
            action = %envelope.request.action(),
            "Received request"
        );

        self.dispatch(envelope.msgid, envelope.request).await
    }

    async fn dispatch(&self, msgid: Value, request: Request) -> Option<Reply> {
        let reply = match request {
            Request::Keys { prefix } => {
                let keys = self.store.keys(prefix.as_deref()).await;
                Reply::success(msgid, keys.into_iter().map(Value::String).collect::<Vec<_>>())
            }
            Request::Printers => match self.printer.printers().await {
                Ok(printers) => {
                    let list = serde_json::to_value(printers).unwrap_or_default();
                    Reply::success(msgid, list)
                }
                Err(e) => Reply::failure(msgid, e),
            },
            Request::Print(order) => {
                self.enqueue_print(msgid, order);
                return None;
            }
            Request::PrintConfig { settings } => self.configure_printer(msgid, settings).await,
            Request::Get { key } => self.get(msgid, &key).await,
            Request::Set { key, value } => {
                if self.store.set(&key, &value).await {
                    Reply::success(msgid, true)
                } else {
                    Reply::failure(msgid, format!("Unable to store value for key: {key}"))
                }
            }
            Request::Append { key, value } => {
                if self.store.append(&key, &value).await {
                    Reply::success(msgid, true)
                } else {
                    Reply::failure(msgid, format!("Unable to append value for key: {key}"))
                }
            }
            Request::Remove { key } => {
                if self.store.remove(&key).await {
                    Reply::success(msgid, true)
                } else {
                    Reply::failure(msgid, format!("Unable to remove key: {key}"))
                }
            }
        };

        Some(reply)
    }

    /// Stored values are bare JSON; embed them structurally, not as strings
    async fn get(&self, msgid: Value, key: &str) -> Reply {
        let Some(raw) = self.store.get(key).await else {
            return Reply::success(msgid, Value::Null);
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Reply::success(msgid, value),
            Err(e) => {
                tracing::warn!(connection = %self.id, key, error = %e, "Stored value is not JSON");
                Reply::failure(msgid, ProtocolError::InvalidStoredValue(key.to_string()))
            }
        }
    }

    async fn configure_printer(&self, msgid: Value, settings: PrintSettings) -> Reply {
        match self.printer.configure(settings).await {
            Ok(settings) => Reply::success(msgid, settings.to_value()),
            Err(e) => Reply::failure(msgid, e),
        }
    }

    fn enqueue_print(&self, msgid: Value, order: PrintOrder) {
        let request = PrintRequest::new(msgid, order, self.outbox.clone());
        if let Err(e) = self.printer.enqueue(request) {
            // the dropped request has already replied with the error
            tracing::error!(connection = %self.id, error = %e, "Print request not queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::memory::MemoryPrintService;
    use crate::trust::TrustedOrigins;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    const ORIGIN: &str = "https://example.org";

    struct Fixture {
        _dir: TempDir,
        session: Session,
        rx: UnboundedReceiver<String>,
    }

    fn fixture_with(service: MemoryPrintService) -> Fixture {
        let dir = TempDir::new().unwrap();
        let gate = TrustGate::new(TrustedOrigins::from_domains([ORIGIN]));
        let (printer, _worker) = PrintBridge::spawn(service).unwrap();
        let (outbox, rx) = Outbox::channel(Uuid::new_v4());
        let handshake = Handshake {
            remote: "127.0.0.1:40000".parse().unwrap(),
            origin: Some(ORIGIN.to_string()),
        };
        let session = Session::open(&gate, &handshake, dir.path(), printer, outbox).unwrap();
        Fixture {
            _dir: dir,
            session,
            rx,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryPrintService::with_printer_names(["Front Desk", "Lab"]))
    }

    async fn send(session: &Session, msg: Value) -> Reply {
        session
            .handle_message(&msg.to_string())
            .await
            .expect("synchronous reply")
    }

    #[test]
    fn test_untrusted_origin_gets_no_session() {
        let dir = TempDir::new().unwrap();
        let gate = TrustGate::new(TrustedOrigins::from_domains([ORIGIN]));
        let (printer, _worker) = PrintBridge::spawn(MemoryPrintService::default()).unwrap();
        let (outbox, _rx) = Outbox::channel(Uuid::new_v4());
        let handshake = Handshake {
            remote: "127.0.0.1:40000".parse().unwrap(),
            origin: Some("https://evil.example".to_string()),
        };

        let result = Session::open(&gate, &handshake, dir.path(), printer, outbox);
        assert!(matches!(result, Err(TrustError::Untrusted(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_set_then_get_embeds_json() {
        let fx = fixture();

        let reply = send(
            &fx.session,
            json!({"msgid": 1, "action": "set", "key": "a:b", "value": "\"hi\""}),
        )
        .await;
        assert_eq!(reply, Reply::success(json!(1), true));

        let reply = send(&fx.session, json!({"msgid": 2, "action": "get", "key": "a:b"})).await;
        assert_eq!(reply.to_json(), r#"{"msgid":2,"content":"hi"}"#);
    }

    #[tokio::test]
    async fn test_get_absent_is_null_content() {
        let fx = fixture();
        let reply = send(&fx.session, json!({"msgid": "q", "action": "get", "key": "nope"})).await;
        assert_eq!(reply, Reply::success(json!("q"), Value::Null));
    }

    #[tokio::test]
    async fn test_get_non_json_value_is_error() {
        let fx = fixture();
        send(
            &fx.session,
            json!({"msgid": 1, "action": "set", "key": "raw", "value": "not json"}),
        )
        .await;

        let reply = send(&fx.session, json!({"msgid": 2, "action": "get", "key": "raw"})).await;
        assert_eq!(
            reply,
            Reply::failure(json!(2), "Error JSON-parsing stored value for key: raw")
        );
    }

    #[tokio::test]
    async fn test_append_and_remove() {
        let fx = fixture();
        let first = json!({"msgid": 1, "action": "append", "key": "n", "value": "[1"});
        let second = json!({"msgid": 2, "action": "append", "key": "n", "value": ",2]"});
        send(&fx.session, first).await;
        send(&fx.session, second).await;

        let reply = send(&fx.session, json!({"msgid": 3, "action": "get", "key": "n"})).await;
        assert_eq!(reply, Reply::success(json!(3), json!([1, 2])));

        let reply = send(&fx.session, json!({"msgid": 4, "action": "remove", "key": "n"})).await;
        assert_eq!(reply, Reply::success(json!(4), true));

        let reply = send(&fx.session, json!({"msgid": 5, "action": "keys"})).await;
        assert_eq!(reply, Reply::success(json!(5), json!([])));
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let fx = fixture();
        for key in ["foo", "foobar"] {
            send(&fx.session, json!({"msgid": 1, "action": "set", "key": key, "value": "1"})).await;
        }

        let reply = send(&fx.session, json!({"msgid": 3, "action": "keys"})).await;
        assert_eq!(reply, Reply::success(json!(3), json!(["foo", "foobar"])));

        let reply = send(&fx.session, json!({"msgid": 3, "action": "keys", "key": "foob"})).await;
        assert_eq!(reply, Reply::success(json!(3), json!(["foobar"])));
    }

    #[tokio::test]
    async fn test_protocol_errors_keep_msgid() {
        let fx = fixture();

        let reply = fx.session.handle_message("not json").await.unwrap();
        assert_eq!(reply.msgid(), &Value::Null);
        assert!(!reply.is_success());

        let reply = send(&fx.session, json!({"action": "keys"})).await;
        assert_eq!(reply, Reply::failure(Value::Null, "No msgid specified in request"));

        let reply = send(&fx.session, json!({"msgid": 9, "action": "frob"})).await;
        assert_eq!(reply, Reply::failure(json!(9), "No such action: frob"));

        let reply = send(&fx.session, json!({"msgid": 10, "action": "get"})).await;
        assert_eq!(reply, Reply::failure(json!(10), "No key specified in request"));
    }

    #[tokio::test]
    async fn test_failed_write_has_distinct_error() {
        let fx = fixture();
        let reply = send(
            &fx.session,
            json!({"msgid": 1, "action": "set", "key": "..", "value": "1"}),
        )
        .await;
        assert_eq!(reply, Reply::failure(json!(1), "Unable to store value for key: .."));

        let reply = send(
            &fx.session,
            json!({"msgid": 2, "action": "append", "key": "..", "value": "1"}),
        )
        .await;
        assert_eq!(reply, Reply::failure(json!(2), "Unable to append value for key: .."));
    }

    #[tokio::test]
    async fn test_printers() {
        let fx = fixture();
        let reply = send(&fx.session, json!({"msgid": 1, "action": "printers"})).await;
        assert_eq!(
            reply,
            Reply::success(
                json!(1),
                json!([
                    {"name": "Front Desk", "isDefault": true},
                    {"name": "Lab", "isDefault": false},
                ])
            )
        );
    }

    #[tokio::test]
    async fn test_print_config() {
        let fx = fixture();

        let request = json!({
            "msgid": 1,
            "action": "print-config",
            "config": {"printer": "Lab", "copies": 2}
        });
        let reply = send(&fx.session, request).await;
        assert_eq!(
            reply,
            Reply::success(json!(1), json!({"printer": "Lab", "copies": 2}))
        );

        let reply = send(
            &fx.session,
            json!({"msgid": 2, "action": "print-config", "config": {"printer": "DoesNotExist"}}),
        )
        .await;
        assert_eq!(reply, Reply::failure(json!(2), "No such printer: DoesNotExist"));
    }

    #[tokio::test]
    async fn test_print_replies_asynchronously() {
        let mut fx = fixture();

        let sync = fx
            .session
            .handle_message(
                &json!({"msgid": 4, "action": "print", "config": {"printer": "DoesNotExist"}})
                    .to_string(),
            )
            .await;
        assert!(sync.is_none());

        let raw = fx.rx.recv().await.unwrap();
        let reply: Reply = serde_json::from_str(&raw).unwrap();
        assert_eq!(reply, Reply::failure(json!(4), "No such printer: DoesNotExist"));
    }

    #[tokio::test]
    async fn test_closed_session_ignores_messages() {
        let mut fx = fixture();
        fx.session.close();
        assert_eq!(fx.session.state(), SessionState::Closed);
        assert!(fx
            .session
            .handle_message(&json!({"msgid": 1, "action": "keys"}).to_string())
            .await
            .is_none());
    }
}
