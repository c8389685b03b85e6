//! Patunay NFC bridge: entry point.
//!
//! The desktop UI shell spawns this binary and talks to it over stdin/stdout,
//! one JSON object per line.  The bridge owns the card reader; the UI never
//! touches hardware.
//!
//! # Usage
//!
//! ```text
//! patunay-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --backend <BACKEND>    Reader backend: mock | pcsc
//!   --log-level <LEVEL>    error | warn | info | debug | trace
//!   --init-config          Write the effective config to the config path and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Description                              |
//! |--------------------------|------------------------------------------|
//! | `PATUNAY_CONFIG`         | Config file path                         |
//! | `PATUNAY_READER_BACKEND` | Reader backend                           |
//! | `PATUNAY_LOG_LEVEL`      | Log level (`RUST_LOG` still wins)        |
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! # Architecture overview
//!
//! ```text
//! UI shell  (NDJSON over the child's stdin/stdout)
//!       ↕
//! patunay-bridge  ← this process
//!   infrastructure/ipc     stdio session, replies, channel filter
//!   application/           EventBridge, modes, device status, tag I/O
//!   infrastructure/reader  PC/SC or mock ReaderAdapter
//!       ↕
//! NFC reader + tags
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use patunay_bridge::application::event_bridge::EventBridge;
use patunay_bridge::infrastructure::ipc::serve_stdio;
use patunay_bridge::infrastructure::reader::mock::MockReader;
use patunay_bridge::infrastructure::reader::ReaderAdapter;
use patunay_bridge::infrastructure::storage::config::{
    config_file_path, load_config_from, save_config_to, BridgeConfig, ReaderBackend, ReaderConfig,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Patunay NFC bridge.
///
/// Owns the NFC reader and exchanges JSON events and commands with the
/// Patunay desktop UI over stdin/stdout.
#[derive(Debug, Parser)]
#[command(
    name = "patunay-bridge",
    about = "NFC device-communication bridge for the Patunay desktop application",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    ///
    /// Defaults to `nfc-bridge.toml` in the platform config directory.  A
    /// missing file means "all defaults".
    #[arg(long, env = "PATUNAY_CONFIG")]
    config: Option<PathBuf>,

    /// Reader backend, overriding `[reader] backend` from the config file.
    #[arg(long, value_enum, env = "PATUNAY_READER_BACKEND")]
    backend: Option<ReaderBackend>,

    /// Log level, overriding `[logging] level` from the config file.
    #[arg(long, env = "PATUNAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    /// The config file this run uses.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("cannot locate the platform config directory"),
        }
    }

    /// Applies command-line overrides on top of the loaded config.
    fn apply_overrides(&self, config: &mut BridgeConfig) {
        if let Some(backend) = self.backend {
            config.reader.backend = backend;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

// ── Adapter selection ─────────────────────────────────────────────────────────

fn build_adapter(config: &BridgeConfig) -> anyhow::Result<Arc<dyn ReaderAdapter>> {
    match config.reader.backend {
        ReaderBackend::Mock => {
            warn!("using the mock reader backend; no hardware will be touched");
            Ok(Arc::new(MockReader::with_readers(
                config.mock.readers.iter().cloned(),
            )))
        }
        ReaderBackend::Pcsc => pcsc_adapter(&config.reader),
    }
}

#[cfg(feature = "pcsc")]
fn pcsc_adapter(reader: &ReaderConfig) -> anyhow::Result<Arc<dyn ReaderAdapter>> {
    use patunay_bridge::infrastructure::reader::pcsc::PcscReader;
    Ok(Arc::new(PcscReader::new(reader.poll_interval())))
}

#[cfg(not(feature = "pcsc"))]
fn pcsc_adapter(_reader: &ReaderConfig) -> anyhow::Result<Arc<dyn ReaderAdapter>> {
    anyhow::bail!("this build has no PC/SC support; rebuild with `--features pcsc` or use `--backend mock`")
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config_path()?;
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    cli.apply_overrides(&mut config);

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // stdout carries the protocol, so logs go to stderr.  `RUST_LOG` wins
    // over the configured level when set.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.init_config {
        save_config_to(&config_path, &config)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        info!("wrote {}", config_path.display());
        return Ok(());
    }

    let codec = config.codec()?;
    let adapter = build_adapter(&config)?;
    info!(
        backend = ?config.reader.backend,
        capacity = codec.layout().capacity,
        "Patunay NFC bridge starting"
    );

    let (bridge, handle) = EventBridge::new(adapter, codec);
    // Subscribe the session before the bridge emits its first event.
    let session = serve_stdio(handle.clone());
    let bridge_task = bridge.spawn();
    let mut session_task = tokio::spawn(session);

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = &mut session_task => match result {
            Ok(Ok(())) => info!("UI shell closed the command stream"),
            Ok(Err(e)) => error!("IPC session failed: {e:#}"),
            Err(e) => error!("IPC session task failed: {e}"),
        },
        () = ctrl_c => {}
    }

    if handle.shutdown().await.is_ok() {
        if let Err(e) = bridge_task.await {
            error!("bridge task failed: {e}");
        }
    }
    session_task.abort();

    info!("Patunay NFC bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
