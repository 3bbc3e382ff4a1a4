//! caponed — Capone service host daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;

use capone_core::config::Config;
use caponed::Server;

fn print_usage() {
    println!("Usage: caponed --config <file>");
    println!();
    println!("Options:");
    println!("  --config <file>   Host configuration (identity, services, ACLs)");
    println!();
    println!("Logging is controlled by RUST_LOG (default: error).");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
        )
        .init();

    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(
                    args.next().context("--config requires a value")?,
                ));
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                bail!("unknown argument: {other}");
            }
        }
    }
    let Some(config_path) = config_path else {
        print_usage();
        bail!("--config is required");
    };

    let config = Config::load(&config_path)?;
    let server = Server::bind(config).await?;
    tracing::info!(identity = %server.public_key(), "caponed starting");
    for (kind, addr) in server.service_addrs()? {
        tracing::info!(service = %kind, %addr, "listening");
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        }
        let _ = signal_tx.send(());
    });

    server.run(shutdown_tx).await?;
    tracing::info!("caponed stopped");
    Ok(())
}
