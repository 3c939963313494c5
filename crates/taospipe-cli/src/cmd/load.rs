//! Load subcommand - stream JSON-lines rows into TDengine through the batch pipeline

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use rayon::prelude::*;
use taospipe_core::{Pipeline, SharedProgress, Store, fmt_num};
use taospipe_rest::RestStore;

use crate::config::Config;
use crate::input::{self, RowRecord, Target};
use crate::shutdown;

/// Malformed-line warnings logged per file before going quiet
const MAX_LINE_WARNINGS: usize = 10;

/// Rows between progress message updates
const MESSAGE_EVERY: usize = 10_000;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Input files or glob patterns (JSON lines, optionally .gz)
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Database for records without a "db" field
    #[arg(long)]
    pub db: Option<String>,

    /// Super table for records without a "stable" field
    #[arg(long)]
    pub stable: Option<String>,

    /// Files read in parallel
    #[arg(short, long, default_value_t = 4)]
    pub readers: usize,

    /// Statement executors (overrides config)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Dispatched batches allowed to wait for a worker (overrides config)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Maximum statement size in bytes (overrides config)
    #[arg(long)]
    pub max_batch_bytes: Option<usize>,

    /// Log every executed statement at debug level
    #[arg(long)]
    pub show_sql: bool,
}

/// Per-run counters shared by the reader threads
#[derive(Default)]
struct Counters {
    rows: AtomicUsize,
    skipped: AtomicUsize,
    files_done: AtomicUsize,
    files_failed: AtomicUsize,
}

pub fn run(args: LoadArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let start = Instant::now();
    let paths = input::expand_inputs(&args.inputs)?;

    let mut settings = config.pipeline;
    if let Some(w) = args.workers {
        settings.workers = w;
    }
    if let Some(c) = args.queue_capacity {
        settings.queue_capacity = Some(c);
    }
    if let Some(b) = args.max_batch_bytes {
        settings.max_batch_bytes = b;
    }
    settings.show_sql |= args.show_sql;

    let mut rest = config.rest_config();
    rest.pool_size = settings.workers;
    let store = RestStore::new(rest).context("Failed to create REST client")?;

    let mut builder = Pipeline::builder(store)
        .workers(settings.workers)
        .max_batch_bytes(settings.max_batch_bytes)
        .retry_interval(Duration::from_millis(settings.retry_interval_ms))
        .show_sql(settings.show_sql);
    if let Some(c) = settings.queue_capacity {
        builder = builder.queue_capacity(c);
    }
    let pipeline = builder.build()?;

    shutdown::install_handlers();

    let target = Target {
        db: args.db.or_else(|| config.connection.database.clone()),
        stable: args.stable,
    };
    let counters = Counters::default();

    log::info!(
        "Loading {} files with {} readers into {}",
        paths.len(),
        args.readers,
        pipeline.store().config().endpoint()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.readers.max(1))
        .thread_name(|i| format!("taospipe-reader-{i}"))
        .build()
        .context("Failed to create reader pool")?;

    pool.install(|| {
        paths.par_iter().for_each(|path| {
            match load_file(path, &pipeline, &target, &counters, progress) {
                Ok(rows) => {
                    counters.files_done.fetch_add(1, Ordering::Relaxed);
                    log::debug!("{}: {} rows", path.display(), fmt_num(rows));
                }
                Err(e) => {
                    counters.files_failed.fetch_add(1, Ordering::Relaxed);
                    log::error!("{}: {e:#}", path.display());
                }
            }
        });
    });

    let read_elapsed = start.elapsed();
    let drain = progress.stage_line("drain");
    drain.set_message(format!("{} batches outstanding", pipeline.outstanding()));
    pipeline.close();
    drain.finish_and_clear();

    let rows = counters.rows.load(Ordering::Relaxed);
    let skipped = counters.skipped.load(Ordering::Relaxed);
    let done = counters.files_done.load(Ordering::Relaxed);
    let failed = counters.files_failed.load(Ordering::Relaxed);
    let elapsed = start.elapsed();

    let summary = [
        (
            "Files",
            format!("{done}/{} ({failed} failed)", paths.len()),
        ),
        (
            "Rows",
            format!("{} appended ({} skipped)", fmt_num(rows), fmt_num(skipped)),
        ),
        ("Read time", format!("{:.1}s", read_elapsed.as_secs_f64())),
        ("Total time", format!("{:.1}s", elapsed.as_secs_f64())),
        ("Throughput", format!("{:.0} rows/sec", rate(rows, elapsed))),
    ];
    if progress.is_tty() {
        print_summary(&summary);
    } else {
        for (label, value) in &summary {
            log::info!("{label}: {value}");
        }
    }

    if shutdown::stop_requested() {
        anyhow::bail!("Interrupted; rows read before the signal were written");
    }
    if failed > 0 {
        anyhow::bail!("{failed} input files failed");
    }
    Ok(())
}

/// Append every row of one file. Returns the number of rows appended.
fn load_file<S: Store>(
    path: &Path,
    pipeline: &Pipeline<S>,
    target: &Target,
    counters: &Counters,
    progress: &SharedProgress,
) -> Result<usize> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let size = std::fs::metadata(path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let pb = progress.file_bar(&name, size);
    let reader = input::open_lines(path, &pb)?;

    let mut rows = 0usize;
    let mut warnings = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        if shutdown::stop_requested() {
            log::warn!("{name}: stopping at line {}", lineno + 1);
            break;
        }
        let line = line.with_context(|| format!("read error at line {}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        let appended = RowRecord::parse(&line).and_then(|record| {
            let (db, stable) = record.target(target)?;
            pipeline.append_row(
                db,
                stable,
                &record.table,
                &record.fields,
                record.tags.as_ref(),
            )?;
            Ok(())
        });
        match appended {
            Ok(()) => {
                rows += 1;
                counters.rows.fetch_add(1, Ordering::Relaxed);
                if rows % MESSAGE_EVERY == 0 {
                    pb.set_message(format!("{} rows", fmt_num(rows)));
                }
            }
            Err(e) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                warnings += 1;
                if warnings <= MAX_LINE_WARNINGS {
                    log::warn!("{name}:{}: {e:#}", lineno + 1);
                } else {
                    log::debug!("{name}:{}: {e:#}", lineno + 1);
                }
            }
        }
    }

    pb.finish_and_clear();
    if warnings > MAX_LINE_WARNINGS {
        log::warn!("{name}: {warnings} lines skipped in total");
    }
    Ok(rows)
}

fn rate(rows: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

/// Key-value summary table on stderr
fn print_summary(rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Load").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}
