//! Command-line driver for the hot-key cache engine.
//!
//! Provides commands for:
//! - Planning a single cycle against a cluster fixture
//! - Running the periodic scheduler until interrupted

pub mod commands;
pub mod config;
pub mod fixture;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
pub use fixture::StaticCluster;
