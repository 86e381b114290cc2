use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tillguard")]
#[command(about = "License activation for the till point-of-sale app")]
pub struct Cli {
    /// Override the directory holding the encrypted license store
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the license server base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print this machine's id, name and code hash
    Machine,
    /// Print the current license status
    Status,
    /// Activate a full (HK-...) or trial (HT-...) code
    Activate { code: String },
    /// Remove the activation from this machine
    Reset,
    /// Run the background license checks until interrupted
    Watch,
}
