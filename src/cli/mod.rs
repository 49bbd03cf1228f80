//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{DeployCommand, HistoryCommand, PlanCommand, ValidateCommand};
use std::ffi::OsString;

/// Application-tier deployment for a provisioned three-tier cluster
#[derive(Debug, Parser, Clone)]
#[command(name = "rollout")]
#[command(version)]
#[command(about = "Deploys the application tier onto a provisioned cluster", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a deployment
    Deploy(DeployCommand),

    /// Validate a deployment plan
    Validate(ValidateCommand),

    /// Print a plan's step order
    Plan(PlanCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
