//! In-memory print backend
//!
//! Virtual printers that record every rendered document in a shared
//! spool instead of printing it. Used for tests and for running the
//! bridge on machines without a print system.

use super::{resolve_printer, Document, PrintJob, PrintService, PrintSettings, PrinterInfo};
use crate::error::PrintError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A document captured by the memory backend
#[derive(Debug, Clone, PartialEq)]
pub struct SpooledDocument {
    pub job: PrintJob,
    pub document: Document,
}

/// Shared handle onto the documents a `MemoryPrintService` has printed
#[derive(Debug, Clone, Default)]
pub struct PrintSpool {
    documents: Arc<Mutex<Vec<SpooledDocument>>>,
}

impl PrintSpool {
    /// Snapshot of everything printed so far, oldest first
    pub fn documents(&self) -> Vec<SpooledDocument> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, doc: SpooledDocument) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(doc);
    }
}

/// Print backend with virtual printers
pub struct MemoryPrintService {
    printers: Vec<PrinterInfo>,
    accept_dialogs: bool,
    render_delay: Duration,
    spool: PrintSpool,
}

impl MemoryPrintService {
    /// Create a backend with the given printers
    pub fn new(printers: Vec<PrinterInfo>) -> Self {
        Self {
            printers,
            accept_dialogs: true,
            render_delay: Duration::ZERO,
            spool: PrintSpool::default(),
        }
    }

    /// Create a backend from printer names; the first one is the default
    pub fn with_printer_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let printers = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| PrinterInfo::new(name, i == 0))
            .collect();
        Self::new(printers)
    }

    /// Answer every print dialog with `accept`
    pub fn accept_dialogs(mut self, accept: bool) -> Self {
        self.accept_dialogs = accept;
        self
    }

    /// Block for `delay` while rendering each job
    pub fn render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// Handle onto the spool, usable after the backend moves to its worker
    pub fn spool(&self) -> PrintSpool {
        self.spool.clone()
    }
}

impl Default for MemoryPrintService {
    fn default() -> Self {
        Self::with_printer_names(["Virtual Printer"])
    }
}

impl PrintService for MemoryPrintService {
    fn name(&self) -> &str {
        "memory"
    }

    fn list_printers(&mut self) -> Result<Vec<PrinterInfo>, PrintError> {
        Ok(self.printers.clone())
    }

    fn build_job(&mut self, settings: &PrintSettings) -> Result<PrintJob, PrintError> {
        let printer = resolve_printer(&self.printers, settings.printer.as_deref())?;
        Ok(PrintJob::new(printer.name.clone(), settings))
    }

    fn show_dialog(&mut self, job: &mut PrintJob) -> bool {
        tracing::debug!(job = %job.id, accept = self.accept_dialogs, "Virtual print dialog");
        self.accept_dialogs
    }

    fn render(&mut self, job: &PrintJob, document: &Document) -> Result<(), PrintError> {
        if !self.render_delay.is_zero() {
            std::thread::sleep(self.render_delay);
        }
        self.spool.push(SpooledDocument {
            job: job.clone(),
            document: document.clone(),
        });
        tracing::info!(job = %job.id, printer = %job.printer, "Document spooled in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_name_is_default() {
        let mut service = MemoryPrintService::with_printer_names(["A", "B"]);
        let printers = service.list_printers().unwrap();
        assert_eq!(printers, vec![PrinterInfo::new("A", true), PrinterInfo::new("B", false)]);
    }

    #[test]
    fn test_render_records_document() {
        let mut service = MemoryPrintService::default();
        let spool = service.spool();

        let job = service.build_job(&PrintSettings::default()).unwrap();
        assert_eq!(job.printer, "Virtual Printer");

        service
            .render(&job, &Document::new("<p>hi</p>", "text/html"))
            .unwrap();
        assert_eq!(spool.len(), 1);
        assert_eq!(
            spool.documents()[0].document.content.as_deref(),
            Some("<p>hi</p>")
        );
    }

    #[test]
    fn test_unknown_printer() {
        let mut service = MemoryPrintService::default();
        let settings = PrintSettings {
            printer: Some("DoesNotExist".into()),
            ..Default::default()
        };
        assert_eq!(
            service.build_job(&settings),
            Err(PrintError::NoSuchPrinter("DoesNotExist".into()))
        );
    }

    #[test]
    fn test_declining_dialogs() {
        let mut service = MemoryPrintService::default().accept_dialogs(false);
        let mut job = service.build_job(&PrintSettings::default()).unwrap();
        assert!(!service.show_dialog(&mut job));
    }
}
