use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tracker",
    about = "Aircraft telemetry ingest and archive node",
    version
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tracker.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tracker node (default when no command is given)
    Start,
    /// Publish the signed node descriptor and exit
    Register,
    /// Print the persisted counter row
    Stats,
    /// Fetch and print the most recent stats snapshot without mutating
    /// anything
    RestoreCheck,
}
