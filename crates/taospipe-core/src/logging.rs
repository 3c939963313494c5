//! Logging setup: env_logger, routed through indicatif when progress bars are live

use std::io::Write;

use indicatif::MultiProgress;

/// Padded level label plus optional ANSI color.
fn level_label(level: log::Level, color: bool) -> String {
    let (ansi, label) = match level {
        log::Level::Error => ("\x1b[31m", "ERROR"),
        log::Level::Warn => ("\x1b[33m", "WARN "),
        log::Level::Info => ("\x1b[32m", "INFO "),
        log::Level::Debug => ("\x1b[36m", "DEBUG"),
        log::Level::Trace => ("\x1b[35m", "TRACE"),
    };
    if color {
        format!("{ansi}{label}\x1b[0m")
    } else {
        label.to_string()
    }
}

/// Worker threads are named `taospipe-worker-N`; tag their lines so
/// interleaved retries can be told apart.
fn thread_tag() -> String {
    match std::thread::current().name() {
        Some(name) if name.starts_with("taospipe-") => format!(" {name}:"),
        _ => String::new(),
    }
}

/// Logger that prints through `MultiProgress` so lines don't tear progress bars.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let line = format!(
                "[{}]{} {}",
                level_label(record.level(), true),
                thread_tag(),
                record.args()
            );
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging. `RUST_LOG` overrides the level picked from the flags.
///
/// With `multi` set (TTY), output goes through the progress bars; otherwise
/// plain uncolored lines suitable for log aggregation.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(default_level);

    match multi {
        Some(multi) => {
            let logger = env_logger::Builder::from_env(env).build();
            let max_level = logger.filter();
            if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))
                .is_ok()
            {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = env_logger::Builder::from_env(env)
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{} [{}]{} {}",
                        buf.timestamp_millis(),
                        level_label(record.level(), false),
                        thread_tag(),
                        record.args()
                    )
                })
                .try_init();
        }
    }
}
