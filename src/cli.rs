use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "promptgate")]
#[command(about = "Policy-enforcing security proxy for LLM provider traffic")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "promptgate.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start,
    /// View decision audit records
    Logs {
        /// Show last N entries
        #[arg(long, default_value = "50")]
        tail: usize,
        /// Export records
        #[arg(long)]
        export: bool,
        /// Export format (json or csv)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Initialize PromptGate configuration
    Init,
}
