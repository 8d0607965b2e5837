use crate::fixture::StaticCluster;
use anyhow::Context;
use replication::{
    CacheConfig, CacheEngine, Collaborators, CycleReport, InMemoryCatalog, InMemoryTaskQueue,
    Task,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Run one statistics/plan/evict cycle and print the emitted tasks
    Plan,
    /// Run the periodic scheduler until Ctrl-C
    Run,
}

/// Outcome of a command, printed by the binary.
#[derive(Debug)]
pub enum CommandResult {
    Planned { report: CycleReport },
    Stopped { tasks: Vec<Task> },
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks = match self {
            CommandResult::Planned { report } => &report.tasks,
            CommandResult::Stopped { tasks } => tasks,
        };
        match serde_json::to_string_pretty(tasks) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl Command {
    pub async fn execute(
        &self,
        config: CacheConfig,
        cluster: StaticCluster,
    ) -> anyhow::Result<CommandResult> {
        let cluster = Arc::new(cluster);
        let queue = Arc::new(InMemoryTaskQueue::new());
        let engine = CacheEngine::new(
            config,
            Collaborators {
                topology: cluster.clone(),
                stats: cluster.clone(),
                catalog: Arc::new(InMemoryCatalog::new()),
                queue: queue.clone(),
                sizes: cluster,
            },
        )
        .context("building cache engine")?;
        engine.start().await.context("loading topology")?;

        match self {
            Command::Plan => {
                let report = engine.run_cycle().await;
                Ok(CommandResult::Planned { report })
            }
            Command::Run => {
                let engine = Arc::new(engine);
                let (tx, rx) = watch::channel(false);
                let scheduler = tokio::spawn(Arc::clone(&engine).run(rx));
                tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                info!("interrupt received");
                let _ = tx.send(true);
                scheduler.await.context("joining scheduler")?;
                Ok(CommandResult::Stopped {
                    tasks: queue.tasks(),
                })
            }
        }
    }
}
