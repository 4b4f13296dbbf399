//! CUPS print backend
//!
//! Drives the system print queues through the `lpstat` and `lp` command
//! line tools. CUPS has no interactive dialog, so confirmation requests
//! are answered from configuration.
//!
//! Every child process runs under a deadline. A command that does not
//! exit in time is killed and reaped, and the call fails with
//! [`PrintError::Render`].
//!
//! CUPS ships no filter for HTML, so HTML documents are reduced to their
//! text and submitted as `text/plain`. Types CUPS cannot print at all are
//! refused with [`PrintError::UnsupportedContentType`] before `lp` runs.

use super::{resolve_printer, Document, PrintJob, PrintService, PrintSettings, PrinterInfo};
use crate::error::PrintError;
use scraper::{ElementRef, Html, Node};
use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DEFAULT_DESTINATION_PREFIX: &str = "system default destination:";

/// Default deadline for a single `lp` or `lpstat` invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Print backend for CUPS-managed printers
#[derive(Debug, Clone)]
pub struct CupsPrintService {
    lp: String,
    lpstat: String,
    allow_unattended: bool,
    timeout: Duration,
}

impl CupsPrintService {
    /// Create a backend using the given `lp` and `lpstat` executables
    pub fn new(lp: impl Into<String>, lpstat: impl Into<String>) -> Self {
        Self {
            lp: lp.into(),
            lpstat: lpstat.into(),
            allow_unattended: true,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Whether print confirmation requests are accepted without a user
    pub fn allow_unattended(mut self, allow: bool) -> Self {
        self.allow_unattended = allow;
        self
    }

    /// How long one `lp` or `lpstat` run may take before it is killed
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lpstat(&self, flag: &str) -> Result<String, PrintError> {
        let output = run_bounded(&self.lpstat, &[flag.to_string()], None, self.timeout)?;

        // lpstat exits non-zero when there are no destinations at all
        if !output.status.success() {
            tracing::debug!(
                command = %self.lpstat,
                flag,
                status = %output.status,
                stderr = %output.stderr.trim(),
                "lpstat reported no destinations"
            );
            return Ok(String::new());
        }

        Ok(output.stdout)
    }
}

impl Default for CupsPrintService {
    fn default() -> Self {
        Self::new("lp", "lpstat")
    }
}

impl PrintService for CupsPrintService {
    fn name(&self) -> &str {
        "cups"
    }

    fn list_printers(&mut self) -> Result<Vec<PrinterInfo>, PrintError> {
        let names = parse_destinations(&self.lpstat("-e")?);
        let default = parse_default_destination(&self.lpstat("-d")?);

        let printers: Vec<PrinterInfo> = names
            .into_iter()
            .map(|name| {
                let is_default = default.as_deref() == Some(name.as_str());
                PrinterInfo::new(name, is_default)
            })
            .collect();

        for printer in &printers {
            tracing::debug!(printer = %printer.name, default = printer.is_default, "Found printer");
        }
        Ok(printers)
    }

    fn build_job(&mut self, settings: &PrintSettings) -> Result<PrintJob, PrintError> {
        let printers = self.list_printers()?;
        let printer = resolve_printer(&printers, settings.printer.as_deref())?;
        Ok(PrintJob::new(printer.name.clone(), settings))
    }

    fn show_dialog(&mut self, job: &mut PrintJob) -> bool {
        if self.allow_unattended {
            tracing::info!(job = %job.id, "No interactive dialog; accepting print job");
        } else {
            tracing::warn!(job = %job.id, "No interactive dialog; declining print job");
        }
        self.allow_unattended
    }

    fn render(&mut self, job: &PrintJob, document: &Document) -> Result<(), PrintError> {
        let content = document.content.as_deref().ok_or(PrintError::MissingContent)?;
        let format = lp_format(&document.content_type)?;
        let payload = match format {
            LpFormat::Direct(_) => content.to_string(),
            LpFormat::HtmlText => html_to_text(content),
        };

        let args = lp_args(job, format.document_format());
        let output = run_bounded(&self.lp, &args, Some(payload.as_bytes()), self.timeout)?;

        if !output.status.success() {
            let stderr = output.stderr.trim();
            return Err(PrintError::Render(if stderr.is_empty() {
                format!("{} failed: {}", self.lp, output.status)
            } else {
                stderr.to_string()
            }));
        }
        if let Some(e) = output.write_error {
            return Err(PrintError::Render(format!("cannot write to {}: {e}", self.lp)));
        }

        tracing::info!(
            job = %job.id,
            printer = %job.printer,
            content_type = %document.content_type,
            format = format.document_format(),
            bytes = payload.len(),
            spool = %output.stdout.trim(),
            "Document sent to CUPS"
        );
        Ok(())
    }
}

/// How a document is handed to `lp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LpFormat {
    /// Sent unchanged with this `document-format`
    Direct(&'static str),
    /// Reduced to its text content first
    HtmlText,
}

impl LpFormat {
    fn document_format(self) -> &'static str {
        match self {
            Self::Direct(format) => format,
            Self::HtmlText => "text/plain",
        }
    }
}

/// Map a client MIME type onto something the CUPS filters accept
fn lp_format(content_type: &str) -> Result<LpFormat, PrintError> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let format = match mime.as_str() {
        "text/html" | "application/xhtml+xml" => return Ok(LpFormat::HtmlText),
        "text/plain" => "text/plain",
        "application/pdf" => "application/pdf",
        "application/postscript" => "application/postscript",
        "image/png" => "image/png",
        "image/jpeg" => "image/jpeg",
        "image/gif" => "image/gif",
        _ => return Err(PrintError::UnsupportedContentType(content_type.to_string())),
    };
    Ok(LpFormat::Direct(format))
}

/// Elements whose text never reaches the page
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "template", "noscript", "title"];

/// Elements that start a new line
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "tr", "ul",
];

/// Extract readable text from an HTML document, one block per line
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    let mut text = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if HIDDEN_ELEMENTS.contains(&name) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
    if block {
        out.push('\n');
    }
}

/// What a finished child left behind
#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
    /// Set when the child stopped reading its input early
    write_error: Option<std::io::Error>,
}

/// Run `program` to completion, killing it once `timeout` has passed
///
/// Input is written from a helper thread and both output pipes are drained
/// on their own threads, so a child that stops reading cannot block us
/// past the deadline. The child is always reaped.
fn run_bounded(
    program: &str,
    args: &[String],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput, PrintError> {
    let mut child = Command::new(program)
        .args(args)
        .env("LC_ALL", "C")
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PrintError::Render(format!("cannot run {program}: {e}")))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    let writer = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(bytes)) => {
            let bytes = bytes.to_vec();
            Some(std::thread::spawn(move || stdin.write_all(&bytes)))
        }
        _ => None,
    };

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                tracing::warn!(
                    command = program,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out; killing it"
                );
                let _ = child.kill();
                bounded_reap(&mut child, program);
                // Closing our handles lets the pipe threads see EOF
                drop(child);
                let join_deadline = Instant::now() + JOIN_TIMEOUT;
                let _ = join_bounded(writer, join_deadline);
                let _ = join_bounded(stdout, join_deadline);
                let _ = join_bounded(stderr, join_deadline);
                return Err(PrintError::Render(format!(
                    "{program} timed out after {}s",
                    timeout.as_secs_f32()
                )));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                bounded_reap(&mut child, program);
                return Err(PrintError::Render(format!("{program} did not finish: {e}")));
            }
        }
    };

    let join_deadline = Instant::now() + JOIN_TIMEOUT;
    let write_error = join_bounded(writer, join_deadline).and_then(Result::err);
    let text = |bytes: Option<Vec<u8>>| {
        String::from_utf8_lossy(&bytes.unwrap_or_default()).into_owned()
    };
    Ok(CommandOutput {
        status,
        stdout: text(join_bounded(stdout, join_deadline)),
        stderr: text(join_bounded(stderr, join_deadline)),
        write_error,
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Join a helper thread, abandoning it if it outlives `deadline`
fn join_bounded<T>(handle: Option<JoinHandle<T>>, deadline: Instant) -> Option<T> {
    let handle = handle?;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    handle.join().ok()
}

/// Wait a short while for a killed child to exit
fn bounded_reap(child: &mut Child, program: &str) {
    let deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
        }
    }
    tracing::warn!(command = program, "Killed command did not exit");
}

/// Parse `lpstat -e` output: one destination per line
fn parse_destinations(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `lpstat -d` output
fn parse_default_destination(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix(DEFAULT_DESTINATION_PREFIX)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

/// Build the `lp` argument list for a job
fn lp_args(job: &PrintJob, document_format: &str) -> Vec<String> {
    let settings = &job.settings;
    let mut args = vec![
        "-d".to_string(),
        job.printer.clone(),
        "-t".to_string(),
        job.id.clone(),
        "-o".to_string(),
        format!("document-format={document_format}"),
    ];
    let mut option = |value: String| {
        args.push("-o".to_string());
        args.push(value);
    };

    if let Some(collation) = settings.collation.as_deref() {
        option(format!("collate={}", collation.eq_ignore_ascii_case("COLLATED")));
    }
    if let Some(sides) = settings.print_sides.as_deref().and_then(cups_sides) {
        option(format!("sides={sides}"));
    }
    if let Some(orientation) = settings.page_orientation.as_deref().and_then(cups_orientation) {
        option(format!("orientation-requested={orientation}"));
    }
    if let Some(color) = settings.print_color.as_deref() {
        let mode = if color.eq_ignore_ascii_case("MONOCHROME") {
            "monochrome"
        } else {
            "color"
        };
        option(format!("print-color-mode={mode}"));
    }
    if let Some(source) = settings.paper_source.as_deref() {
        // "Automatic" means let the printer decide
        if !source.eq_ignore_ascii_case("Automatic") {
            option(format!("InputSlot={source}"));
        }
    }

    if let Some(copies) = settings.copies.filter(|c| *c > 0) {
        args.push("-n".to_string());
        args.push(copies.to_string());
    }

    args
}

fn cups_sides(sides: &str) -> Option<&'static str> {
    match sides.to_ascii_uppercase().as_str() {
        "ONE_SIDED" => Some("one-sided"),
        "DUPLEX" => Some("two-sided-long-edge"),
        "TUMBLE" => Some("two-sided-short-edge"),
        _ => None,
    }
}

fn cups_orientation(orientation: &str) -> Option<u8> {
    match orientation.to_ascii_uppercase().as_str() {
        "PORTRAIT" => Some(3),
        "LANDSCAPE" => Some(4),
        "REVERSE_LANDSCAPE" => Some(5),
        "REVERSE_PORTRAIT" => Some(6),
        _ => None,
    }
}
