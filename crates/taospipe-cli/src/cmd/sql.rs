//! `exec` and `query` subcommands - synchronous statements with bounded retry

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde_json::Value;
use taospipe_core::{Row, execute_with_retry, fmt_num, query_with_retry};
use taospipe_rest::RestStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct SqlArgs {
    /// Statement text
    pub sql: String,

    /// Retries after the first failed attempt (overrides config)
    #[arg(long)]
    pub max_retries: Option<u32>,
}

fn store_and_policy(
    args: &SqlArgs,
    config: &Config,
) -> Result<(RestStore, taospipe_core::RetryPolicy)> {
    let store = RestStore::new(config.rest_config()).context("Failed to create REST client")?;
    let mut policy = config.retry.policy();
    if let Some(n) = args.max_retries {
        policy.max_retries = Some(n);
    }
    Ok((store, policy))
}

pub fn exec(args: SqlArgs, config: &Config) -> Result<()> {
    let (store, policy) = store_and_policy(&args, config)?;
    let affected = execute_with_retry(&store, &args.sql, &policy)
        .with_context(|| format!("Statement failed: {}", args.sql))?;
    println!("{} rows affected", fmt_num(affected as usize));
    Ok(())
}

pub fn query(args: SqlArgs, config: &Config) -> Result<()> {
    let (store, policy) = store_and_policy(&args, config)?;
    let rows = query_with_retry(&store, &args.sql, &policy)
        .with_context(|| format!("Query failed: {}", args.sql))?;
    if rows.is_empty() {
        eprintln!("(0 rows)");
        return Ok(());
    }
    println!("{}", rows_table(&rows));
    eprintln!("({} rows)", fmt_num(rows.len()));
    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Table with the first row's columns as header
fn rows_table(rows: &[Row]) -> Table {
    let columns: Vec<&String> = rows.first().map(|r| r.keys().collect()).unwrap_or_default();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    for row in rows {
        table.add_row(
            columns
                .iter()
                .map(|c| row.get(c.as_str()).map(cell_text).unwrap_or_default())
                .collect::<Vec<_>>(),
        );
    }
    table
}
