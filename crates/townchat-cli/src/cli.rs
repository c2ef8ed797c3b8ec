//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Platform base URL (http, https, ws or wss)
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Access token presented during the handshake
    #[arg(short, long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a conversation and chat over stdin/stdout
    Chat {
        /// Conversation identifier
        #[arg(short = 'C', long)]
        conversation: String,

        /// Show sent messages before the server echoes them
        #[arg(long)]
        local_echo: bool,
    },
    /// Print a conversation's history and exit
    History {
        /// Conversation identifier
        #[arg(short = 'C', long)]
        conversation: String,

        /// Print messages as JSON lines
        #[arg(long)]
        json: bool,

        /// Seconds to wait for the history to arrive
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Show configuration
    Config {
        /// Print an example configuration file instead of the effective one
        #[arg(long)]
        example: bool,
    },
}
