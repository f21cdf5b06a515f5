//! Command-line interface for labsync.
//!
//! This module provides the CLI structure and command handlers for the
//! `labsyncd` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, MarkCommand, OutputFormat, QueueCommand, RunCommand, SessionsCommand,
    StatusCommand,
};

/// labsyncd - Offline-resilient lab attendance sync
///
/// Keeps a kiosk terminal's lab-session cache fresh, applies the attendance
/// decision policy to marks, and replays marks queued while the backend was
/// unreachable.
#[derive(Debug, Parser)]
#[command(name = "labsyncd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sync daemon for a terminal
    Run(RunCommand),

    /// Show store and queue status
    Status(StatusCommand),

    /// List cached or current sessions
    Sessions(SessionsCommand),

    /// List queued marks awaiting replay
    Queue(QueueCommand),

    /// Mark a student's attendance
    Mark(MarkCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
