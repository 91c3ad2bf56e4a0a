use std::sync::Arc;

use clap::Parser;
use physio_core::PhysioConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use physio_server::{http, server, ServiceContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "physio.toml")]
    config: String,

    /// Check storage connectivity and exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match PhysioConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let default_level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let ctx = match ServiceContext::from_config(config).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match ctx.store.health().await {
            Ok(v) => println!("✅ {} storage connected: {}", ctx.store.name(), v),
            Err(e) => {
                println!("❌ {} storage check failed: {}", ctx.store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Prediction endpoint: {}", ctx.config.prediction.endpoint);
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let ipc = ctx.config.service.socket_path.clone().map(|socket_path| {
        let ipc_ctx = ctx.clone();
        let ipc_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server::run_unix_server(&socket_path, ipc_ctx, ipc_shutdown).await {
                tracing::error!("IPC server error: {}", e);
            }
        })
    });

    if ctx.config.http.enabled {
        http::start_http_server(ctx.clone(), tx.subscribe()).await?;
    } else if let Some(handle) = ipc {
        handle.await?;
        return Ok(());
    } else {
        tracing::warn!("Neither HTTP nor IPC is enabled; nothing to serve");
        return Ok(());
    }

    if let Some(handle) = ipc {
        handle.await?;
    }

    Ok(())
}
