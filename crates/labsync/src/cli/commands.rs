//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Terminal identity, e.g. `swlab1rm2`
    pub identity: String,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sessions command arguments.
#[derive(Debug, Args)]
pub struct SessionsCommand {
    /// Show all cached sessions, not just current ones
    #[arg(short, long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Queue command arguments.
#[derive(Debug, Args)]
pub struct QueueCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Mark command arguments.
#[derive(Debug, Args)]
pub struct MarkCommand {
    /// Terminal identity, e.g. `swlab1rm2`
    pub identity: String,

    /// The student to mark
    pub student_id: String,

    /// Mark within a specific session instead of scanning current ones
    #[arg(short, long)]
    pub session: Option<String>,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Plain,
    /// Formatted table
    #[default]
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_run_command_debug() {
        let cmd = RunCommand {
            identity: "swlab1rm1".to_string(),
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("identity"));
        assert!(debug_str.contains("swlab1rm1"));
    }

    #[test]
    fn test_mark_command_debug() {
        let cmd = MarkCommand {
            identity: "swlab1rm1".to_string(),
            student_id: "U200001A".to_string(),
            session: None,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("student_id"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_output_format_clone() {
        let format = OutputFormat::Json;
        let cloned = format;
        assert_eq!(format, cloned);
    }
}
