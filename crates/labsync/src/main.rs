//! `labsyncd` - attendance sync daemon and CLI
//!
//! This binary runs the background sync loop for a kiosk terminal and
//! provides one-shot commands for inspecting the cache, the replay queue,
//! and the configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;

use labsync::cli::{
    Cli, Command, ConfigCommand, MarkCommand, OutputFormat, RunCommand, SessionsCommand,
};
use labsync::engine::MarkOutcome;
use labsync::{init_logging, Config, Engine, HttpRemote, Store, TerminalIdentity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Run(cmd) => handle_run(&config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Sessions(cmd) => handle_sessions(&config, &cmd),
        Command::Queue(cmd) => handle_queue(&config, cmd.json),
        Command::Mark(cmd) => handle_mark(&config, &cmd).await,
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn build_engine(config: &Config, identity: &str) -> anyhow::Result<Engine> {
    let identity = TerminalIdentity::parse(identity)?;
    let store = Store::open(config.database_path())?;

    let mut remote = HttpRemote::new(config.backend.base_url.clone(), config.request_timeout());
    if let Some(token) = &config.backend.auth_token {
        remote = remote.with_auth_token(token.clone());
    }

    Ok(Engine::new(store, Arc::new(remote), identity, config.clone())?)
}

async fn handle_run(config: &Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(config, &cmd.identity)?);
    println!("labsyncd running as {}", engine.identity());

    let handle = labsync::scheduler::spawn(Arc::clone(&engine), config);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    println!("Shutting down...");
    handle.shutdown().await;

    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = Store::open(config.database_path())?;
    let stats = store.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": config.database_path(),
            "sessions": stats.sessions,
            "pending_mutations": stats.pending_mutations,
            "marked_students": stats.marked_students,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("labsyncd status");
        println!("---------------");
        println!("Database:          {}", config.database_path().display());
        println!("Cached sessions:   {}", stats.sessions);
        println!("Queued marks:      {}", stats.pending_mutations);
        println!("Marked students:   {}", stats.marked_students);
        println!("Database size:     {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

fn handle_sessions(config: &Config, cmd: &SessionsCommand) -> anyhow::Result<()> {
    let store = Store::open(config.database_path())?;
    let mut sessions = store.all_sessions()?;

    if !cmd.all {
        let horizon = Local::now().naive_local() + config.lookahead();
        sessions.retain(|s| s.contains(horizon));
    }

    match cmd.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        OutputFormat::Plain => {
            for session in &sessions {
                println!("{}", session.session_id);
            }
        }
        OutputFormat::Table => {
            if sessions.is_empty() {
                println!("No sessions.");
                return Ok(());
            }
            println!(
                "{:<10} {:<8} {:<8} {:<6} {:<12} {:<8} {:>8}",
                "MODULE", "GROUP", "LAB", "ROOM", "DATE", "START", "STUDENTS"
            );
            for session in &sessions {
                println!(
                    "{:<10} {:<8} {:<8} {:<6} {:<12} {:<8} {:>8}",
                    session.module_code,
                    session.class_group_id,
                    session.lab_name,
                    session.room,
                    session.date,
                    session.start_time.format("%H:%M"),
                    session.students.len(),
                );
            }
        }
    }
    Ok(())
}

fn handle_queue(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = Store::open(config.database_path())?;
    let queue = store.pending_mutations()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&queue)?);
    } else if queue.is_empty() {
        println!("Queue is empty.");
    } else {
        println!("{:<6} {:<16} {:<24} {:<8}", "ID", "KIND", "ATTENDANCE", "STATUS");
        for mutation in &queue {
            println!(
                "{:<6} {:<16} {:<24} {:<8}",
                mutation.id.unwrap_or_default(),
                mutation.kind,
                mutation.attendance_id,
                mutation.status,
            );
        }
    }
    Ok(())
}

async fn handle_mark(config: &Config, cmd: &MarkCommand) -> anyhow::Result<()> {
    let engine = build_engine(config, &cmd.identity)?;
    let now = Local::now().naive_local();

    let outcome = match &cmd.session {
        Some(session_id) => engine.mark_student(session_id, &cmd.student_id, now).await?,
        None => engine.mark_by_identifier(&cmd.student_id, now).await?,
    };

    match outcome {
        MarkOutcome::Marked { status, queued } => {
            println!(
                "Marked {} as {}{}",
                cmd.student_id,
                status,
                if queued {
                    " (queued for replay)"
                } else {
                    ""
                }
            );
        }
        MarkOutcome::AlreadyMarked { status } => {
            println!("{} is already marked as {}", cmd.student_id, status);
        }
        MarkOutcome::NotFound => {
            println!("{} is not in any current session", cmd.student_id);
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Backend]");
                println!("  Base URL:           {}", config.backend.base_url);
                println!(
                    "  Request timeout:    {}s",
                    config.backend.request_timeout_secs
                );
                println!();
                println!("[Sync]");
                println!("  Lookahead:          {} min", config.sync.lookahead_minutes);
                println!(
                    "  Fetch margin:       {} min",
                    config.sync.fetch_margin_minutes
                );
                println!(
                    "  Refresh interval:   {}s",
                    config.sync.refresh_interval_secs
                );
                println!("  Clock boundary:     {} min", config.sync.boundary_minutes);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Labs]");
                let mut labs: Vec<_> = config.labs.rooms.iter().collect();
                labs.sort_by_key(|(name, _)| (*name).clone());
                for (lab, rooms) in labs {
                    println!("  {lab}: rooms {rooms:?}");
                }
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
