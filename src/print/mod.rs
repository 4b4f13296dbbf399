//! Printing collaborator: the abstraction over native print backends
//!
//! All print backends (CUPS, in-memory, etc.) implement `PrintService`.
//! A backend is owned by exactly one thread, the `PrintBridge` worker, so
//! implementations never need to be reentrant.

use crate::error::{PrintError, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod bridge;
pub mod cups;
pub mod memory;

/// Default MIME type for print documents
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// A printer known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterInfo {
    /// Printer (queue) name
    pub name: String,

    /// Whether this is the system default printer
    pub is_default: bool,
}

impl PrinterInfo {
    pub fn new(name: impl Into<String>, is_default: bool) -> Self {
        Self {
            name: name.into(),
            is_default,
        }
    }
}

/// Job settings as exchanged with the client
///
/// Known settings are typed; anything else the client sends is kept in
/// `extra` and echoed back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSettings {
    /// Target printer; `None` selects the default printer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copies: Option<u32>,

    /// `COLLATED` or `UNCOLLATED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_source: Option<String>,

    /// `COLOR` or `MONOCHROME`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_quality: Option<String>,

    /// `ONE_SIDED`, `DUPLEX` or `TUMBLE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_sides: Option<String>,

    /// `PORTRAIT` or `LANDSCAPE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_orientation: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PrintSettings {
    /// Parse the `config` member of a request envelope
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidConfig(
                "config must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))
    }

    /// Render as a JSON object for a reply
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The printable document carried by a `print` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document body; `None` if the client sent nothing to print
    pub content: Option<String>,

    /// MIME type of `content`
    pub content_type: String,
}

impl Document {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            content_type: content_type.into(),
        }
    }

    /// A request that carried no content
    pub fn empty() -> Self {
        Self {
            content: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// A job bound to a concrete printer
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    /// Job identifier, used as the spool title and in logs
    pub id: String,

    /// Resolved printer name
    pub printer: String,

    /// Effective settings; dialogs may modify these
    pub settings: PrintSettings,
}

impl PrintJob {
    /// Create a job for `printer`, recording the printer in the settings
    pub fn new(printer: impl Into<String>, settings: &PrintSettings) -> Self {
        let printer = printer.into();
        let mut settings = settings.clone();
        settings.printer = Some(printer.clone());
        Self {
            id: format!("hatch-{}", uuid::Uuid::new_v4()),
            printer,
            settings,
        }
    }
}

/// Core trait for print backends
///
/// Mirrors the life of a native print job: resolve a printer and build a
/// job, optionally confirm it with the user, render the document, then
/// finalize the job and report the settings that were actually used.
pub trait PrintService: Send + 'static {
    /// Backend name (e.g., "cups", "memory")
    fn name(&self) -> &str;

    /// Enumerate available printers
    fn list_printers(&mut self) -> Result<Vec<PrinterInfo>, PrintError>;

    /// Bind `settings` to a printer
    ///
    /// Fails with `PrintError::NoSuchPrinter` when the named printer is
    /// unknown.
    fn build_job(&mut self, settings: &PrintSettings) -> Result<PrintJob, PrintError>;

    /// Show the print dialog for `job`; returns false if the user cancelled
    fn show_dialog(&mut self, job: &mut PrintJob) -> bool;

    /// Send `document` to the printer
    fn render(&mut self, job: &PrintJob, document: &Document) -> Result<(), PrintError>;

    /// Finalize `job`, returning its effective settings
    fn end_job(&mut self, job: PrintJob) -> PrintSettings {
        job.settings
    }
}

/// Pick the printer a job should use
///
/// `requested` names a printer exactly; `None` falls back to the default.
pub fn resolve_printer<'a>(
    printers: &'a [PrinterInfo],
    requested: Option<&str>,
) -> Result<&'a PrinterInfo, PrintError> {
    match requested {
        Some(name) => printers
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PrintError::NoSuchPrinter(name.to_string())),
        None => printers
            .iter()
            .find(|p| p.is_default)
            .ok_or(PrintError::NoDefaultPrinter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_keep_unknown_keys() {
        let raw = json!({
            "printer": "Front Desk",
            "copies": 2,
            "pageLayout": {"topMargin": 10.0},
        });
        let settings = PrintSettings::from_value(&raw).unwrap();

        assert_eq!(settings.printer.as_deref(), Some("Front Desk"));
        assert_eq!(settings.copies, Some(2));
        assert_eq!(settings.extra["pageLayout"]["topMargin"], 10.0);
        assert_eq!(settings.to_value(), raw);
    }

    #[test]
    fn test_settings_reject_non_object() {
        assert!(matches!(
            PrintSettings::from_value(&json!("Front Desk")),
            Err(ProtocolError::InvalidConfig(_))
        ));
        assert!(matches!(
            PrintSettings::from_value(&json!({"copies": "two"})),
            Err(ProtocolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_printer_info_wire_names() {
        let value = serde_json::to_value(PrinterInfo::new("Lab", true)).unwrap();
        assert_eq!(value, json!({"name": "Lab", "isDefault": true}));
    }

    #[test]
    fn test_resolve_printer() {
        let printers = vec![PrinterInfo::new("A", false), PrinterInfo::new("B", true)];

        assert_eq!(resolve_printer(&printers, Some("A")).unwrap().name, "A");
        assert_eq!(resolve_printer(&printers, None).unwrap().name, "B");
        assert_eq!(
            resolve_printer(&printers, Some("DoesNotExist")),
            Err(PrintError::NoSuchPrinter("DoesNotExist".into()))
        );
        assert_eq!(
            resolve_printer(&printers[..1], None),
            Err(PrintError::NoDefaultPrinter)
        );
    }

    #[test]
    fn test_job_records_resolved_printer() {
        let job = PrintJob::new("B", &PrintSettings::default());
        assert!(job.id.starts_with("hatch-"));
        assert_eq!(job.settings.printer.as_deref(), Some("B"));
    }
}
