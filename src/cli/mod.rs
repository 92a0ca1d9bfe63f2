//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A local conversational assistant running an on-device model
#[derive(Parser, Debug)]
#[command(name = "cellio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute (defaults to `chat`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat with the assistant
    Chat {
        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Manage chat sessions
    Session {
        #[command(subcommand)]
        cmd: SessionCommand,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// List all saved sessions
    List,
    /// Create an empty session
    New {
        /// Session title
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Print every message of a session
    Show {
        /// Session ID
        id: String,
    },
    /// Change a session's title
    Rename {
        /// Session ID
        id: String,
        /// New title
        title: String,
    },
    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
}
