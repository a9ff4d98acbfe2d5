use anyhow::Result;
use attribution::config::Config;
use attribution::server::Server;
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Referral attribution and rate limiting service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Override BIND_ADDR
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    /// Override REDIS_URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Override LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(redis_url) = cli.redis_url {
        config.redis_url = redis_url;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("attribution={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting attribution service");
    tracing::info!(
        "Configuration: bind_addr={}, environment={}, redis={}",
        config.bind_addr,
        config.environment,
        if config.redis_enabled() { "enabled" } else { "disabled" }
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
