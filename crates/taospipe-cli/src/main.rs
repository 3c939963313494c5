//! taospipe - Batched, concurrent row loader for TDengine
//!
//! Streams JSON-lines rows through a multi-row INSERT pipeline against the
//! taosAdapter REST endpoint, and runs one-off statements and queries.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;
mod input;
mod shutdown;

use config::Config;

#[derive(Parser)]
#[command(name = "taospipe")]
#[command(about = "Batched, concurrent row loader for TDengine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./taospipe.toml or ~/.config/taospipe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// taosAdapter base URL, e.g. http://localhost:6041
    #[arg(long, global = true)]
    url: Option<String>,

    /// REST user
    #[arg(long, global = true)]
    user: Option<String>,

    /// Default database for statements and rows
    #[arg(long, global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Load JSON-lines rows through the batch pipeline
    Load(cmd::load::LoadArgs),
    /// Execute one statement and print the affected row count
    Exec(cmd::sql::SqlArgs),
    /// Run one query and print the result as a table
    Query(cmd::sql::SqlArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(taospipe_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    taospipe_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // CLI overrides
    if let Some(url) = cli.url {
        config.connection.url = url;
    }
    if let Some(user) = cli.user {
        config.connection.user = user;
    }
    if cli.database.is_some() {
        config.connection.database = cli.database;
    }

    match cli.command {
        Command::Load(args) => cmd::load::run(args, &config, &progress),
        Command::Exec(args) => cmd::sql::exec(args, &config),
        Command::Query(args) => cmd::sql::query(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let rest = config.rest_config();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Endpoint", &rest.endpoint()]);
            table.add_row(vec!["User", &rest.user]);
            table.add_row(vec![
                "Password",
                if config.connection.password.is_some() {
                    "configured"
                } else {
                    "default"
                },
            ]);
            table.add_row(vec![
                "Timeout",
                &format!("{}s", config.connection.timeout_secs),
            ]);
            table.add_row(vec!["Workers", &config.pipeline.workers.to_string()]);
            table.add_row(vec![
                "Queue capacity",
                &config
                    .pipeline
                    .queue_capacity
                    .unwrap_or(config.pipeline.workers)
                    .to_string(),
            ]);
            table.add_row(vec![
                "Max batch",
                &format!("{} bytes", taospipe_core::fmt_num(config.pipeline.max_batch_bytes)),
            ]);
            table.add_row(vec![
                "Batch retry interval",
                &format!("{}ms", config.pipeline.retry_interval_ms),
            ]);
            table.add_row(vec![
                "Statement retries",
                &format!(
                    "{} every {}ms",
                    config.retry.max_retries, config.retry.interval_ms
                ),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
