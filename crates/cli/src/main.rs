//! CLI entry point for the cache engine.

use clap::Parser;
use cli::CliConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    let filter = match &config.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cache_engine=info,replication=info,warn")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = config.run().await?;
    println!("{}", result);
    Ok(())
}
