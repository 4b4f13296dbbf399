use std::path::PathBuf;
use std::thread::JoinHandle;

use clap::{Parser, Subcommand};

use a3s_hatch::config::{HatchConfig, PrintBackend, PrintBackendConfig};
use a3s_hatch::error::{HatchError, Result};
use a3s_hatch::print::bridge::PrintBridge;
use a3s_hatch::print::cups::CupsPrintService;
use a3s_hatch::print::memory::MemoryPrintService;
use a3s_hatch::server::{self, AppState};
use a3s_hatch::trust::TrustGate;

#[derive(Parser)]
#[command(
    name = "hatch",
    about = "hatch: local printing and storage bridge for trusted web applications",
    version
)]
struct Cli {
    /// Config file (defaults to ./hatch.hcl when present)
    #[arg(short, long, env = "HATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept WebSocket connections until Ctrl-C
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Base directory for per-origin key stores
        #[arg(long)]
        profile_dir: Option<PathBuf>,
        /// Trusted origin; repeat to trust several, "*" trusts all
        #[arg(long = "trust", value_name = "ORIGIN")]
        trust: Vec<String>,
    },
    /// List the printers the configured backend can see
    Printers,
    /// Check the config file and exit
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        HatchConfig::load(cli.config.as_deref())
            .map(|c| c.log_level)
            .unwrap_or_else(|_| "info".into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("[hatch] {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = HatchConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            profile_dir,
            trust,
        } => {
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            if profile_dir.is_some() {
                cfg.profile_directory = profile_dir;
            }
            if !trust.is_empty() {
                cfg.trusted_domains = trust;
            }
            cfg.validate()?;
            serve(cfg).await
        }
        Commands::Printers => {
            let (bridge, _worker) = spawn_bridge(&cfg.print)?;
            let printers = bridge.printers().await?;
            if printers.is_empty() {
                println!("no printers found");
            }
            for printer in printers {
                let marker = if printer.is_default { " (default)" } else { "" };
                println!("{}{marker}", printer.name);
            }
            Ok(())
        }
        Commands::Validate => {
            println!(
                "config OK: ws://{}{} ({} trusted domain(s), {:?} printing)",
                cfg.bind_addr()?,
                cfg.server.path,
                cfg.trusted_domains.len(),
                cfg.print.backend
            );
            Ok(())
        }
    }
}

async fn serve(cfg: HatchConfig) -> Result<()> {
    let profile_dir = cfg.profile_dir()?;
    let addr = cfg.bind_addr()?;
    tracing::info!(profile_dir = %profile_dir.display(), "Using profile directory");

    let (printer, _worker) = spawn_bridge(&cfg.print)?;
    let gate = TrustGate::new(cfg.trusted_origins());
    let app = server::router(AppState::new(gate, profile_dir, printer), &cfg.server.path);

    let listener = server::bind(addr).await?;
    server::serve(listener, app, async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
    })
    .await
}

fn spawn_bridge(cfg: &PrintBackendConfig) -> Result<(PrintBridge, JoinHandle<()>)> {
    let spawned = match cfg.backend {
        PrintBackend::Cups => PrintBridge::spawn(
            CupsPrintService::new(&cfg.lp_command, &cfg.lpstat_command)
                .allow_unattended(cfg.allow_unattended)
                .command_timeout(cfg.command_timeout),
        ),
        PrintBackend::Memory => PrintBridge::spawn(
            MemoryPrintService::with_printer_names(cfg.printers.iter().cloned())
                .accept_dialogs(cfg.allow_unattended),
        ),
    };
    spawned
        .map(|(bridge, worker)| (bridge.reply_timeout(cfg.reply_timeout), worker))
        .map_err(|e| HatchError::Server(format!("cannot start print worker: {e}")))
}
