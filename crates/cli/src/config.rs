use crate::commands::{Command, CommandResult};
use crate::fixture::StaticCluster;
use anyhow::Context;
use clap::Parser;
use replication::CacheConfig;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "cache-engine", about = "Hot-key cache placement and eviction engine")]
pub struct CliConfig {
    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cluster fixture (JSON) served in place of a live cluster
    #[arg(long)]
    pub cluster: PathBuf,

    /// Tracing filter, overrides RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub async fn run(&self) -> anyhow::Result<CommandResult> {
        let engine_config = load_engine_config(self.config.as_deref())?;
        let cluster = StaticCluster::load(&self.cluster)?;
        self.command.execute(engine_config, cluster).await
    }
}

pub fn load_engine_config(path: Option<&Path>) -> anyhow::Result<CacheConfig> {
    let Some(path) = path else {
        return Ok(CacheConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: CacheConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}
