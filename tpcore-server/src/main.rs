//! tpcore: bastion gateway core.
//!
//! Loads the protocol modules named in `tpcore.toml`, brokers session
//! tickets between them and the web authority, and runs until told to exit
//! over RPC or by Ctrl-C.
//!
//! Usage:
//!   tpcore --config /usr/local/tpcore/etc/tpcore.toml
//!
//! The process exits with status 0 on every shutdown path; failures are
//! reported in the log.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tpcore_server::config::default_config_path;
use tpcore_server::modules::builtin_catalog;
use tpcore_server::{CoreConfig, CorePaths, ExitSignal, HttpAuthority, Orchestrator};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tpcore")]
#[command(about = "Bastion gateway core: protocol module host and session broker")]
struct Args {
    /// Path to tpcore.toml (default: <install>/etc/tpcore.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let exec_dir = exec_dir();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&exec_dir));
    let config = CoreConfig::load(&config_path);

    let level = match (&config, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.common.log_level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    init_logging(&level);

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Cannot load configuration");
            return;
        }
    };

    if let Err(e) = run(config, &exec_dir) {
        error!("tpcore terminated: {e:#}");
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Directory of the running executable; modules are searched there.
fn exec_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run(config: CoreConfig, exec_dir: &Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tpcore")
        .build()
        .context("failed to build tokio runtime")?;

    let authority =
        HttpAuthority::new(&config.authority).context("failed to build authority client")?;
    let paths = CorePaths::resolve(&config, exec_dir);
    info!(
        config = %config.path().display(),
        exec_dir = %paths.exec_dir.display(),
        authority = %authority.url(),
        "tpcore starting"
    );

    let exit = ExitSignal::new();
    let orchestrator = Orchestrator::new(
        config,
        paths,
        Arc::new(builtin_catalog()),
        Arc::new(authority),
        exit.clone(),
    );

    let report = runtime.block_on(async move {
        tokio::spawn({
            let exit = exit.clone();
            async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl-C received");
                        exit.trigger();
                    }
                    Err(e) => warn!(error = %e, "Cannot install Ctrl-C handler"),
                }
            }
        });
        orchestrator.run().await
    });

    if report.all_ok() {
        info!(modules = report.loaded.len(), "tpcore stopped");
    } else {
        for failure in &report.failures {
            error!(module = %failure.module, "{}", failure.reason);
        }
        warn!("tpcore stopped after a failed startup");
    }

    // A module stop that overran its timeout may still hold a blocking thread.
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
