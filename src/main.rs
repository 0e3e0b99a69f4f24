#![forbid(unsafe_code)]

//! `rpc-bridge` — WebSocket ⇄ subprocess JSON-RPC 2.0 bridge binary.
//!
//! Accepts WebSocket connections and bridges each one to a freshly
//! spawned server subprocess speaking Content-Length framed JSON-RPC
//! over stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use rpc_bridge::{gateway, AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rpc-bridge",
    about = "WebSocket to subprocess JSON-RPC bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    addr: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Server command and arguments, e.g. `-- pyls --stdio`.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("rpc-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
            GlobalConfig::from_toml_str(&text)?
        }
        None => GlobalConfig::default(),
    };

    if let Some(addr) = args.addr {
        config.listen_addr = addr;
    }
    if let Some((command, rest)) = args.command.split_first() {
        config.server_command = command.clone();
        config.server_args = rest.to_vec();
    }
    config.validate()?;

    let config = Arc::new(config);
    info!(
        addr = config.listen_addr,
        command = config.server_command,
        "configuration loaded"
    );

    // ── Start the gateway ───────────────────────────────
    let ct = CancellationToken::new();
    let gateway_ct = ct.clone();
    let gateway_config = Arc::clone(&config);
    let gateway_handle = tokio::spawn(async move {
        if let Err(err) = gateway::serve(gateway_config, gateway_ct).await {
            error!(%err, "gateway failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = gateway_handle.await;
    info!("rpc-bridge shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
