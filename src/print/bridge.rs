//! Print bridge: serialize all printing onto one worker thread
//!
//! Connections hand work to the bridge without blocking. A single
//! dedicated thread owns the `PrintService` and processes commands in
//! FIFO order, so exactly one job renders at a time across the whole
//! process.
//!
//! `printers` and `print-config` wait for their result on a one-shot
//! channel, for at most the bridge's reply timeout; a worker stuck on a
//! long job yields `PrintError::Busy` instead of stalling the caller.
//! `print` does not wait: the worker replies through the originating
//! connection's `Outbox` once the job finishes.

use super::{Document, PrintService, PrintSettings, PrinterInfo};
use crate::error::PrintError;
use crate::protocol::{Outbox, PrintOrder, Reply};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Name of the worker thread
pub const WORKER_THREAD: &str = "hatch-print";

/// How long `printers` and `configure` wait for the worker by default
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// A queued print job and where its result goes
pub struct PrintRequest {
    pub msgid: Value,
    pub settings: PrintSettings,
    pub document: Document,
    pub show_dialog: bool,
    reply_to: Option<Outbox>,
}

impl PrintRequest {
    pub fn new(msgid: Value, order: PrintOrder, reply_to: Outbox) -> Self {
        Self {
            msgid,
            settings: order.settings,
            document: order.document,
            show_dialog: order.show_dialog,
            reply_to: Some(reply_to),
        }
    }

    /// Deliver the outcome of this job to its connection
    fn complete(mut self, outcome: Result<PrintSettings, PrintError>) {
        let Some(outbox) = self.reply_to.take() else {
            return;
        };
        let msgid = std::mem::take(&mut self.msgid);
        let reply = match outcome {
            Ok(settings) => Reply::success(msgid, settings.to_value()),
            Err(e) => Reply::failure(msgid, e),
        };
        outbox.send(&reply);
    }
}

impl Drop for PrintRequest {
    /// A request dropped without a result (queue gone, worker exited)
    /// still answers its client
    fn drop(&mut self) {
        if let Some(outbox) = self.reply_to.take() {
            tracing::warn!(
                connection = %outbox.connection_id(),
                msgid = %self.msgid,
                "Print request dropped before completion"
            );
            outbox.send(&Reply::failure(
                std::mem::take(&mut self.msgid),
                PrintError::Unavailable,
            ));
        }
    }
}

enum Command {
    ListPrinters(oneshot::Sender<Result<Vec<PrinterInfo>, PrintError>>),
    Configure {
        settings: PrintSettings,
        reply: oneshot::Sender<Result<PrintSettings, PrintError>>,
    },
    Print(PrintRequest),
}

/// Handle for submitting work to the print worker
///
/// Cheap to clone; every connection holds one. The worker exits once
/// every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct PrintBridge {
    tx: mpsc::UnboundedSender<Command>,
    reply_timeout: Duration,
}

impl PrintBridge {
    /// Start the worker thread for `service`
    pub fn spawn<S: PrintService>(service: S) -> std::io::Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD.to_string())
            .spawn(move || run_worker(service, rx))?;
        let bridge = Self {
            tx,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        };
        Ok((bridge, handle))
    }

    /// Limit how long `printers` and `configure` wait for the worker
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Queue a print job; never blocks
    ///
    /// If the worker is gone the request is dropped, which replies
    /// `PrintError::Unavailable` to its connection.
    pub fn enqueue(&self, request: PrintRequest) -> Result<(), PrintError> {
        tracing::debug!(msgid = %request.msgid, "Queueing print job");
        self.tx
            .send(Command::Print(request))
            .map_err(|_| PrintError::Unavailable)
    }

    /// Enumerate printers on the worker
    pub async fn printers(&self) -> Result<Vec<PrinterInfo>, PrintError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ListPrinters(reply))
            .map_err(|_| PrintError::Unavailable)?;
        self.wait("printers", rx).await
    }

    /// Validate `settings` (showing the dialog) and return the result
    pub async fn configure(&self, settings: PrintSettings) -> Result<PrintSettings, PrintError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Configure { settings, reply })
            .map_err(|_| PrintError::Unavailable)?;
        self.wait("print-config", rx).await
    }

    async fn wait<T>(
        &self,
        op: &str,
        rx: oneshot::Receiver<Result<T, PrintError>>,
    ) -> Result<T, PrintError> {
        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PrintError::Unavailable),
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_ms = self.reply_timeout.as_millis() as u64,
                    "Print worker did not answer in time"
                );
                Err(PrintError::Busy(self.reply_timeout))
            }
        }
    }

    /// True once the worker has stopped accepting work
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn run_worker<S: PrintService>(mut service: S, mut rx: mpsc::UnboundedReceiver<Command>) {
    tracing::info!(backend = service.name(), "Print worker started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::ListPrinters(reply) => {
                let printers = guarded(|| service.list_printers());
                let _ = reply.send(printers);
            }
            Command::Configure { settings, reply } => {
                let settings = guarded(|| configure(&mut service, &settings));
                let _ = reply.send(settings);
            }
            Command::Print(request) => {
                tracing::info!(msgid = %request.msgid, "Print job started");
                let outcome = guarded(|| print(&mut service, &request));
                match &outcome {
                    Ok(_) => tracing::info!(msgid = %request.msgid, "Print job completed"),
                    Err(e) => {
                        tracing::warn!(msgid = %request.msgid, error = %e, "Print job failed")
                    }
                }
                request.complete(outcome);
            }
        }
    }

    tracing::info!("Print worker stopped");
}

fn configure<S: PrintService>(
    service: &mut S,
    settings: &PrintSettings,
) -> Result<PrintSettings, PrintError> {
    let mut job = service.build_job(settings)?;
    service.show_dialog(&mut job);
    Ok(service.end_job(job))
}

fn print<S: PrintService>(
    service: &mut S,
    request: &PrintRequest,
) -> Result<PrintSettings, PrintError> {
    let mut job = service.build_job(&request.settings)?;

    if request.document.content.is_none() {
        service.end_job(job);
        return Err(PrintError::MissingContent);
    }

    if request.show_dialog && !service.show_dialog(&mut job) {
        tracing::info!(job = %job.id, "Print canceled by user");
        service.end_job(job);
        return Err(PrintError::Cancelled);
    }

    let rendered = service.render(&job, &request.document);
    let settings = service.end_job(job);
    rendered.map(|()| settings)
}

/// Run one backend call, turning a panic into an error reply
fn guarded<T>(f: impl FnOnce() -> Result<T, PrintError>) -> Result<T, PrintError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(reason = %reason, "Print backend panicked");
        Err(PrintError::WorkerPanic(reason))
    })
}
