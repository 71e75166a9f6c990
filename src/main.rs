use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use fs_exporter::agent::Agent;
use fs_exporter::config::{Config, Overrides};

/// Prometheus exporter for FreeSWITCH over the event socket.
#[derive(Parser)]
#[command(name = "fs-exporter", about)]
struct Cli {
    /// Path to an optional YAML configuration file.
    #[arg(short, long, env = "FSE_CONFIG")]
    config: Option<PathBuf>,

    /// FreeSWITCH host.
    #[arg(long, env = "FSE_HOST")]
    host: Option<String>,

    /// FreeSWITCH event socket port.
    #[arg(long, env = "FSE_PORT")]
    port: Option<u16>,

    /// FreeSWITCH event socket password.
    #[arg(long, env = "FSE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Port to serve /metrics on (all interfaces).
    #[arg(long, env = "FSE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Logging verbosity (trace, debug, info, warn, error).
    #[arg(long = "loglevel", alias = "log-level", env = "FSE_LOGLEVEL")]
    log_level: Option<String>,

    /// Do not poll `API status` for freeswitch_channels_total.
    #[arg(long, env = "FSE_DISABLE_CHANNELS_TOTAL")]
    disable_channels_total: bool,

    /// Do not poll `API show channels count` for freeswitch_channels_current.
    #[arg(long, env = "FSE_DISABLE_CHANNELS_CURRENT")]
    disable_channels_current: bool,

    /// Subscribe to all events and export freeswitch_events_total.
    #[arg(long, env = "FSE_ENABLE_EVENTS_TOTAL")]
    enable_events_total: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            metrics_port: self.metrics_port,
            log_level: self.log_level.clone(),
            disable_channels_total: self.disable_channels_total,
            disable_channels_current: self.disable_channels_current,
            enable_events_total: self.enable_events_total,
        }
    }
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("fs-exporter {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    cfg.apply_overrides(&cli.overrides());
    cfg.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting fs-exporter",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let mut agent = Agent::new(cfg)?;
    agent.start().await?;

    shutdown.cancelled().await;

    agent.stop().await?;

    tracing::info!("fs-exporter stopped");

    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }

    shutdown.cancel();
}
