//! skilld - progressive skill disclosure agent daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::eyre;
use skilld::orchestrator::EchoBackend;
use skilld::tools::ToolRegistry;
use skilld::{Daemon, DaemonConfig};
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "skilld", about = "Progressive skill disclosure agent daemon", version)]
struct Cli {
    /// Port for the agent-to-agent endpoint
    #[arg(short, long, default_value = "7710")]
    port: u16,

    /// Path to skilld.conf (defaults: built-in configuration)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace root for project-local skills
    #[arg(short, long)]
    workspace: Option<PathBuf>,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let workspace_root = match cli.workspace {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let config = DaemonConfig {
        workspace_root,
        config_path: cli.config,
        port: cli.port,
        ..Default::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let daemon = Daemon::new(config, ToolRegistry::new(), Arc::new(EchoBackend))
            .map_err(|e| eyre!("failed to initialize daemon: {e}"))?;

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                result = daemon.run() => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, initiating graceful shutdown");
                    daemon.shutdown();
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, initiating graceful shutdown");
                    daemon.shutdown();
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = daemon.run() => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, initiating graceful shutdown");
                    daemon.shutdown();
                }
            }
        }

        Ok(())
    })
}
