use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fluxnetes", version, about = "Fluxnetes scheduler daemon CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the fluxnetes daemon with a config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
}
