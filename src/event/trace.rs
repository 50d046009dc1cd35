//! NDJSON Trace Writer
//!
//! Persists run events to newline-delimited JSON inside the run's state
//! directory for debugging and replay (`autopr trace show <run_id>`).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AutoPrError, Result};

use super::log::{Event, EventLog};

/// NDJSON trace writer for one run.
pub struct TraceWriter {
    writer: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
}

impl TraceWriter {
    /// Create a trace writer at `<run_dir>/trace.ndjson`.
    ///
    /// The run_id embedded in `run_dir` must already be validated by the
    /// state store (no path traversal).
    pub fn new(run_dir: &Path) -> Result<Self> {
        fs::create_dir_all(run_dir)?;
        let path = run_dir.join("trace.ndjson");
        let file = File::create(&path)?;
        tracing::debug!(path = %path.display(), "created trace file");
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            path,
        })
    }

    /// Write a single event.
    pub fn write_event(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    /// Write all events from an EventLog and flush.
    pub fn write_all(&self, event_log: &EventLog) -> Result<()> {
        for event in event_log.events() {
            self.write_event(&event)?;
        }
        self.flush()
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a persisted trace back into events.
pub fn read_trace(path: &Path) -> Result<Vec<Event>> {
    let content = fs::read_to_string(path).map_err(|e| AutoPrError::State {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AutoPrError::from))
        .collect()
}
