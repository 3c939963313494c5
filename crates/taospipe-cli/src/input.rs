//! JSON-lines row input: glob expansion, optional gzip, byte-counted reads

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;
use serde::Deserialize;
use taospipe_core::Row;

/// Read buffer per input file (256KB)
const READ_BUF_SIZE: usize = 256 * 1024;

/// One input line.
///
/// ```json
/// {"db":"power","stable":"meters","table":"d1001","fields":{"ts":1700000000000,"current":10.3},"tags":{"location":"north"}}
/// ```
#[derive(Debug, Deserialize)]
pub struct RowRecord {
    pub db: Option<String>,
    pub stable: Option<String>,
    pub table: String,
    pub fields: Row,
    #[serde(default)]
    pub tags: Option<Row>,
}

/// Fallback database / super table for records that omit them
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub db: Option<String>,
    pub stable: Option<String>,
}

impl RowRecord {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("invalid row record")
    }

    /// Resolve `(db, stable)` against the command-line defaults.
    pub fn target<'a>(&'a self, defaults: &'a Target) -> Result<(&'a str, &'a str)> {
        let db = self
            .db
            .as_deref()
            .or(defaults.db.as_deref())
            .context("record has no \"db\" and no --db default")?;
        let stable = self
            .stable
            .as_deref()
            .or(defaults.stable.as_deref())
            .context("record has no \"stable\" and no --stable default")?;
        Ok((db, stable))
    }
}

/// Expand glob patterns into a sorted, de-duplicated file list.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("invalid input pattern: {pattern}"))?
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("skipping unreadable path: {e}");
                    None
                }
            })
            .collect();
        if matches.is_empty() {
            bail!("no input files match {pattern}");
        }
        paths.extend(matches);
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Reader wrapper advancing a progress bar by the bytes it reads
struct CountingReader<R> {
    inner: R,
    pb: ProgressBar,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pb.inc(n as u64);
        Ok(n)
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open an input file as lines. `.gz` files are decompressed; progress
/// counts bytes on disk either way.
pub fn open_lines(path: &Path, pb: &ProgressBar) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let counted = CountingReader {
        inner: file,
        pb: pb.clone(),
    };
    Ok(if is_gzip(path) {
        Box::new(BufReader::with_capacity(
            READ_BUF_SIZE,
            MultiGzDecoder::new(counted),
        ))
    } else {
        Box::new(BufReader::with_capacity(READ_BUF_SIZE, counted))
    })
}
