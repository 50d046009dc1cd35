//! Persisted run state.
//!
//! Layout under the state directory:
//!
//! ```text
//! runs/<run_id>/workflow.json   the workflow as executed
//! runs/<run_id>/result.json     the RunReport
//! runs/<run_id>/trace.ndjson    the event trace
//! cache/<namespace>/<shard>/<key>
//! ```
//!
//! All writes are crash-safe: serialize to a temp file in the target
//! directory, then atomically rename into place.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::RunReport;
use crate::error::{AutoPrError, Result};
use crate::event::{EventLog, TraceWriter};
use crate::workflow::WorkflowSpec;

/// Handle on the persisted state directory.
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.runs_dir().join(run_id))
    }

    /// Persist a completed run: workflow, result, trace.
    pub fn save_run(
        &self,
        report: &RunReport,
        spec: &WorkflowSpec,
        events: &EventLog,
    ) -> Result<PathBuf> {
        let dir = self.run_dir(&report.run_id)?;
        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join("workflow.json"), spec)?;
        write_json_atomic(&dir.join("result.json"), report)?;
        TraceWriter::new(&dir)?.write_all(events)?;
        Ok(dir)
    }

    /// Load a persisted run report.
    pub fn load_run(&self, run_id: &str) -> Result<RunReport> {
        let path = self.run_dir(run_id)?.join("result.json");
        let bytes = fs::read(&path).map_err(|e| AutoPrError::State {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Run ids on disk, most recently modified first.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let dir = self.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<(std::time::SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry
                .metadata()?
                .modified()
                .unwrap_or(std::time::UNIX_EPOCH);
            if let Some(name) = entry.file_name().to_str() {
                entries.push((modified, name.to_string()));
            }
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }
}

/// Run ids become directory names; reject anything path-like.
fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && !run_id.contains("..")
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AutoPrError::State {
            path: run_id.to_string(),
            reason: "invalid run id (alphanumeric, '-', '_' only)".to_string(),
        })
    }
}

/// Serialize to a temp file next to the target, then rename into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| AutoPrError::State {
        path: path.display().to_string(),
        reason: "no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
