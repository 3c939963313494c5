//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one indicatif bar per input file plus a drain spinner.
//! Non-TTY mode: hidden bars; logs carry the progress.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-file bar: bytes of input consumed, rows appended in the message
fn file_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<24.dim} {bar:30.green/dim} {binary_bytes:>7}/{binary_total_bytes:7} {wide_msg:.dim}")
        .expect("invalid template")
        .progress_chars("--")
}

/// Shared progress context for a CLI run.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Detect TTY on stderr.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Bar tracking how many bytes of an input file were read.
    ///
    /// Hidden outside a TTY.
    pub fn file_bar(&self, name: &str, total_bytes: u64) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(total_bytes));
        pb.set_style(file_style());
        pb.set_prefix(truncate(name, 24).to_string());
        pb
    }

    /// Spinner line for a blocking phase such as draining outstanding batches.
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}")
                .expect("invalid template"),
        );
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// `MultiProgress` for the log bridge
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedProgress = Arc<ProgressContext>;

/// Keep the tail of long names; the file name is the informative part.
fn truncate(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut start = name.len() - max;
    while !name.is_char_boundary(start) {
        start += 1;
    }
    &name[start..]
}

/// Format number with thousand separators.
pub fn fmt_num(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_num_groups() {
        assert_eq!(fmt_num(0), "0");
        assert_eq!(fmt_num(999), "999");
        assert_eq!(fmt_num(1_000), "1,000");
        assert_eq!(fmt_num(1_234_567), "1,234,567");
    }

    #[test]
    fn truncate_keeps_tail() {
        assert_eq!(truncate("short.jsonl", 24), "short.jsonl");
        assert_eq!(truncate("/very/long/path/to/rows.jsonl.gz", 12), "ows.jsonl.gz");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let name = "ééééé.jsonl";
        let t = truncate(name, 7);
        assert!(t.len() <= 7);
        assert!(t.ends_with(".jsonl"));
    }
}
