//! # a3s-hatch
//!
//! Local WebSocket bridge giving trusted web applications access to
//! printers and to a small per-origin file store on the user's machine.
//!
//! ## Overview
//!
//! A browser page connects to `ws://127.0.0.1:35678/hatch`. The `Origin`
//! header is checked once at handshake; untrusted origins are refused
//! before any message is read. Trusted connections exchange JSON
//! envelopes carrying a `msgid` and an `action`:
//!
//! ```json
//! {"msgid": 1, "action": "set", "key": "eg.workstation", "value": {"name": "BR1"}}
//! {"msgid": 1, "content": true}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_hatch::print::bridge::PrintBridge;
//! use a3s_hatch::print::memory::MemoryPrintService;
//! use a3s_hatch::server::{self, AppState};
//! use a3s_hatch::trust::{TrustGate, TrustedOrigins};
//!
//! # async fn example() -> a3s_hatch::Result<()> {
//! let (printer, _worker) = PrintBridge::spawn(MemoryPrintService::default())?;
//! let gate = TrustGate::new(TrustedOrigins::from_domains(["https://example.org"]));
//! let app = server::router(AppState::new(gate, "/tmp/hatch", printer), "/hatch");
//!
//! let listener = server::bind("127.0.0.1:35678".parse().unwrap()).await?;
//! server::serve(listener, app, async {
//!     tokio::signal::ctrl_c().await.ok();
//! })
//! .await
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **TrustGate** - origin allow-list checked at handshake
//! - **Session** - per-connection request parsing and dispatch
//! - **KeyStore** - sandboxed key/value files under `<profile>/<origin>/`
//! - **PrintBridge** - single worker thread owning the `PrintService`
//! - **server** - axum WebSocket accept loop

pub mod config;
pub mod error;
pub mod print;
pub mod protocol;
pub mod sanitize;
pub mod server;
pub mod store;
pub mod trust;

pub use config::HatchConfig;
pub use error::{HatchError, Result};
pub use print::bridge::{PrintBridge, PrintRequest};
pub use print::{PrintService, PrintSettings, PrinterInfo};
pub use protocol::{Reply, Session};
pub use store::KeyStore;
pub use trust::{TrustGate, TrustedOrigins};
