//! Strategy output sinks: CSV trade logs and JSON summary export.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// Buffered CSV sink; the header row is written on open. Write failures
/// are logged and swallowed so logging can never take the strategy down.
pub struct CsvLog {
    writer: BufWriter<File>,
}

impl CsvLog {
    pub fn create(path: impl AsRef<Path>, header: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory for {}", path.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{header}").context("writing log header")?;
        Ok(Self { writer })
    }

    /// Opens the sink, downgrading failure to a warning.
    pub fn open_or_warn(path: impl AsRef<Path>, header: &str) -> Option<Self> {
        match Self::create(&path, header) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "trade log disabled");
                None
            }
        }
    }

    pub fn row(&mut self, row: std::fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.writer, "{row}") {
            warn!(error = %e, "failed to append log row");
        }
    }

    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "failed to flush log");
        }
    }
}

impl Drop for CsvLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Writes a strategy summary as pretty-printed JSON.
pub fn write_json_summary(path: &Path, summary: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating summary directory for {}", path.display()))?;
    }
    let body = serde_json::to_string_pretty(summary).context("serializing summary")?;
    fs::write(path, body).with_context(|| format!("writing summary {}", path.display()))?;
    Ok(())
}
