//! IP intelligence aggregator CLI.

use anyhow::Result;
use clap::Parser;
use ip_intel::server::{router, AppState};
use ip_intel::{Config, LookupService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ip-intel")]
#[command(about = "IP intelligence aggregator - query geolocation and risk APIs for an address")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "ip-intel.yaml")]
    config: PathBuf,

    /// Listen address, overrides server.listen
    #[arg(short = 'a', long, value_name = "ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    // Handle --validate
    if args.validate {
        info!(sources = config.sources.len(), "Configuration is valid");
        return Ok(());
    }

    let service = LookupService::from_config(&config)?;
    let state = Arc::new(AppState::new(service, config.client_id.clone()));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "IP intelligence aggregator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
