//! Command-line interface definition for Lampstand
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for chatting, browsing history, checking the
//! message quota, and storing credentials.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lampstand - Bible study chat with a monthly message quota
#[derive(Parser, Debug, Clone)]
#[command(name = "lampstand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Database file (overrides config and LAMPSTAND_DB)
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Keep everything in memory for this run
    #[arg(long)]
    pub memory: bool,

    /// Local user id
    #[arg(short, long, env = "LAMPSTAND_USER", default_value = "local")]
    pub user: String,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Lampstand
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat
    Chat {
        /// Scope the conversation to a book (e.g. genesis, joao)
        #[arg(short, long)]
        book: Option<String>,

        /// Resume a saved conversation by slug ("last" for the most recent)
        #[arg(short, long)]
        resume: Option<String>,

        /// Preferred Bible translation for quotations (e.g. ARA, NVI)
        #[arg(short, long)]
        translation: Option<String>,

        /// Answer from canned replies instead of calling the API
        #[arg(long)]
        offline: bool,
    },

    /// Browse and manage saved conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Show the message quota for the current window
    Quota,

    /// Store the completion API key in the OS keyring
    Auth {
        /// Remove the stored key instead
        #[arg(long)]
        clear: bool,
    },
}

/// History management subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum HistoryCommand {
    /// List conversations grouped by pinned, today, this week and older
    List,

    /// Print a conversation
    Show {
        /// Session slug
        slug: String,
    },

    /// Rename a conversation
    Rename {
        /// Session slug
        slug: String,
        /// New title
        title: String,
    },

    /// Pin or unpin a conversation
    Pin {
        /// Session slug
        slug: String,
    },

    /// Delete a conversation
    Delete {
        /// Session slug
        slug: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            db: None,
            memory: false,
            user: "local".to_string(),
            command: Commands::Quota,
        }
    }
}
