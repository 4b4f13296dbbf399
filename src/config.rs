//! Hatch configuration, loaded from an HCL file
//!
//! ```hcl
//! log_level         = "info"
//! profile_directory = "/home/me/.evergreen"
//! trusted_domains   = ["https://example.org"]
//!
//! server {
//!   host = "127.0.0.1"
//!   port = 35678
//!   path = "/hatch"
//! }
//!
//! print {
//!   backend         = "cups"
//!   reply_timeout   = "30s"
//!   command_timeout = "60s"
//! }
//! ```
//!
//! The CUPS backend prints `text/plain`, PDF, PostScript and common image
//! types directly. HTML (the protocol default) is reduced to its text
//! content and printed as plain text; layout and styling are not kept.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HatchError, Result};
use crate::trust::{TrustedOrigins, TRUST_ALL};

/// Config file read when none is given
pub const DEFAULT_CONFIG_FILE: &str = "hatch.hcl";

/// Directory under the user's home holding per-origin sandboxes
pub const DEFAULT_PROFILE_DIR: &str = ".evergreen";

#[derive(Debug, Clone, Deserialize)]
pub struct HatchConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base directory for key stores; `~/.evergreen` when unset
    #[serde(default)]
    pub profile_directory: Option<PathBuf>,
    #[serde(default)]
    pub trusted_domains: Vec<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub print: PrintBackendConfig,
}

impl Default for HatchConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            profile_directory: None,
            trusted_domains: Vec::new(),
            server: ServerConfig::default(),
            print: PrintBackendConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket endpoint path
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrintBackend {
    #[default]
    Cups,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrintBackendConfig {
    #[serde(default)]
    pub backend: PrintBackend,
    #[serde(default = "default_lp")]
    pub lp_command: String,
    #[serde(default = "default_lpstat")]
    pub lpstat_command: String,
    /// Accept confirmation requests when the backend has no dialog
    #[serde(default = "default_true")]
    pub allow_unattended: bool,
    /// Virtual printer names for the memory backend; the first is default
    #[serde(default = "default_virtual_printers")]
    pub printers: Vec<String>,
    /// How long `printers` / `print-config` wait for the print worker
    #[serde(default = "default_reply_timeout", with = "duration_serde")]
    pub reply_timeout: Duration,
    /// Deadline for each `lp` / `lpstat` invocation
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

impl Default for PrintBackendConfig {
    fn default() -> Self {
        Self {
            backend: PrintBackend::default(),
            lp_command: default_lp(),
            lpstat_command: default_lpstat(),
            allow_unattended: true,
            printers: default_virtual_printers(),
            reply_timeout: default_reply_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    35678
}
fn default_path() -> String {
    "/hatch".into()
}
fn default_lp() -> String {
    "lp".into()
}
fn default_lpstat() -> String {
    "lpstat".into()
}
fn default_true() -> bool {
    true
}
fn default_virtual_printers() -> Vec<String> {
    vec!["Virtual Printer".into()]
}
fn default_reply_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        if let Some(v) = s.strip_suffix("ms") {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string());
        }
        if let Some(v) = s.strip_suffix('s') {
            return v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string());
        }
        Err(format!("unknown duration format: '{s}' (use '30s' or '500ms')"))
    }
}

impl HatchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| HatchError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_hcl(&src)
            .map_err(|e| HatchError::Config(format!("{} in {}", e, path.display())))
    }

    pub fn from_hcl(src: &str) -> Result<Self> {
        let cfg: HatchConfig =
            hcl::from_str(src).map_err(|e| HatchError::Config(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path`, or `hatch.hcl` if it exists, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    tracing::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(HatchError::Config("server port must not be 0".into()));
        }
        if !self.server.path.starts_with('/') {
            return Err(HatchError::Config(format!(
                "server path '{}' must start with '/'",
                self.server.path
            )));
        }
        if let Some(pos) = self.trusted_domains.iter().position(|d| d == TRUST_ALL) {
            if pos != 0 {
                return Err(HatchError::Config(format!(
                    "'{TRUST_ALL}' must be the first trusted domain (found at position {pos})"
                )));
            }
        }
        if self.print.reply_timeout.is_zero() || self.print.command_timeout.is_zero() {
            return Err(HatchError::Config("print timeouts must be greater than zero".into()));
        }
        if self.print.backend == PrintBackend::Memory && self.print.printers.is_empty() {
            return Err(HatchError::Config(
                "memory print backend needs at least one printer".into(),
            ));
        }
        Ok(())
    }

    pub fn trusted_origins(&self) -> TrustedOrigins {
        TrustedOrigins::from_domains(self.trusted_domains.iter().cloned())
    }

    /// Resolved base directory for key stores
    pub fn profile_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.profile_directory {
            return Ok(dir.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_PROFILE_DIR))
            .ok_or_else(|| {
                HatchError::Config("cannot determine home directory; set profile_directory".into())
            })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                HatchError::Config(format!(
                    "invalid listen address {}:{}: {e}",
                    self.server.host, self.server.port
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HatchConfig::from_hcl("").unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.server.port, 35678);
        assert_eq!(cfg.server.path, "/hatch");
        assert_eq!(cfg.print.backend, PrintBackend::Cups);
        assert!(cfg.print.allow_unattended);
        assert_eq!(cfg.trusted_origins(), TrustedOrigins::from_domains(Vec::<String>::new()));
        assert_eq!(cfg.bind_addr().unwrap(), "127.0.0.1:35678".parse().unwrap());
    }

    #[test]
    fn test_full_file() {
        let src = r#"
log_level         = "debug"
profile_directory = "/var/lib/hatch"
trusted_domains   = ["https://a.example.org", "https://b.example.org"]

server {
  host = "0.0.0.0"
  port = 9000
  path = "/ws"
}

print {
  backend  = "memory"
  printers = ["Front", "Back"]
}
"#;
        let cfg = HatchConfig::from_hcl(src).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.profile_dir().unwrap(), PathBuf::from("/var/lib/hatch"));
        assert_eq!(cfg.server.path, "/ws");
        assert_eq!(cfg.print.backend, PrintBackend::Memory);
        assert_eq!(cfg.print.printers, vec!["Front", "Back"]);
        assert!(cfg.trusted_origins().contains("https://b.example.org"));
        assert!(!cfg.trusted_origins().contains("https://c.example.org"));
    }

    #[test]
    fn test_trust_all_sentinel() {
        let cfg = HatchConfig::from_hcl(r#"trusted_domains = ["*"]"#).unwrap();
        assert_eq!(cfg.trusted_origins(), TrustedOrigins::All);

        let err = HatchConfig::from_hcl(r#"trusted_domains = ["https://a.org", "*"]"#);
        assert!(matches!(err, Err(HatchError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_server() {
        assert!(HatchConfig::from_hcl("server {\n port = 0\n}").is_err());
        assert!(HatchConfig::from_hcl("server {\n path = \"hatch\"\n}").is_err());
        assert!(HatchConfig::from_hcl("server {\n path = \"\"\n}").is_err());
    }

    #[test]
    fn test_print_timeouts() {
        let cfg = HatchConfig::from_hcl("").unwrap();
        assert_eq!(cfg.print.reply_timeout, Duration::from_secs(30));
        assert_eq!(cfg.print.command_timeout, Duration::from_secs(60));

        let src = "print {\n reply_timeout = \"500ms\"\n command_timeout = \"5s\"\n}";
        let cfg = HatchConfig::from_hcl(src).unwrap();
        assert_eq!(cfg.print.reply_timeout, Duration::from_millis(500));
        assert_eq!(cfg.print.command_timeout, Duration::from_secs(5));

        assert!(HatchConfig::from_hcl("print {\n reply_timeout = \"soon\"\n}").is_err());
        assert!(HatchConfig::from_hcl("print {\n command_timeout = \"0s\"\n}").is_err());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(HatchConfig::from_hcl("print {\n backend = \"fax\"\n}").is_err());
    }

    #[test]
    fn test_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hatch.hcl");
        std::fs::write(&path, "server {\n port = 4000\n}\n").unwrap();

        let cfg = HatchConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 4000);

        let missing = dir.path().join("nope.hcl");
        assert!(matches!(
            HatchConfig::load(Some(&missing)),
            Err(HatchError::Config(_))
        ));
    }

    #[test]
    fn test_bad_host() {
        let cfg = HatchConfig::from_hcl("server {\n host = \"not a host\"\n}").unwrap();
        assert!(cfg.bind_addr().is_err());
    }
}
