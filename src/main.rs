// src/main.rs - Emulator server entry point
use clap::Parser;
use std::sync::Arc;

use rpi_sim::config::{Config, load_config};
use rpi_sim::session::SessionManager;
use rpi_sim::web::create_router;

#[derive(Parser, Debug)]
#[command(name = "rpi-sim-server", version, about = "Raspberry Pi hardware emulator")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
    /// Override the bind address from the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path).map_err(|e| {
            eprintln!("Failed to load config from '{}': {}", path, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level())
        .init();

    tracing::info!("Starting rpi-sim emulator");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        tracing::info!("Loaded configuration from: {}", path);
    }
    tracing::info!(
        "Sandbox: {} (timeout {:?}, launcher {:?})",
        config.sandbox.interpreter,
        config.sandbox.timeout(),
        config.sandbox.launcher
    );
    tracing::info!(
        "Board: {} SPI device(s), {} I2C device(s), {} component(s)",
        config.board.spi.len(),
        config.board.i2c.len(),
        config.board.components.len()
    );
    if let Some(dir) = &config.persistence.state_dir {
        tracing::info!("Persisting session graphs under {}", dir.display());
    }

    let bind = config.server.bind.clone();
    let manager = Arc::new(SessionManager::new(config));
    let app = create_router(manager);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Listening on {}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
