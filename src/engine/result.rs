//! Step and run results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Per-step state machine:
/// `pending → scheduled → running → (ok | failed | skipped | timed_out |
/// circuit_open | cached)`. Terminal states are final; no step transitions
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Scheduled,
    Running,
    Ok,
    Failed,
    Skipped,
    TimedOut,
    CircuitOpen,
    Cached,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Scheduled | Self::Running)
    }

    /// Success states whose outputs downstream steps may reference.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Cached)
    }
}

/// The outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: Arc<str>,
    pub status: StepStatus,
    pub output: Arc<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: u32,
    pub cache_hit: bool,
}

impl StepResult {
    pub fn ok(step_id: Arc<str>, output: Value, started_at: DateTime<Utc>, attempts: u32) -> Self {
        Self {
            step_id,
            status: StepStatus::Ok,
            output: Arc::new(output),
            error: None,
            error_kind: None,
            started_at,
            finished_at: Utc::now(),
            attempts,
            cache_hit: false,
        }
    }

    pub fn cached(step_id: Arc<str>, output: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            step_id,
            status: StepStatus::Cached,
            output: Arc::new(output),
            error: None,
            error_kind: None,
            started_at,
            finished_at: Utc::now(),
            attempts: 0,
            cache_hit: true,
        }
    }

    pub fn skipped(step_id: Arc<str>, reason: &str) -> Self {
        let now = Utc::now();
        Self {
            step_id,
            status: StepStatus::Skipped,
            output: Arc::new(Value::Null),
            error: Some(reason.to_string()),
            error_kind: None,
            started_at: now,
            finished_at: now,
            attempts: 0,
            cache_hit: false,
        }
    }

    pub fn failed(
        step_id: Arc<str>,
        status: StepStatus,
        error: String,
        error_kind: ErrorKind,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            step_id,
            status,
            output: Arc::new(Value::Null),
            error: Some(error),
            error_kind: Some(error_kind),
            started_at,
            finished_at: Utc::now(),
            attempts,
            cache_hit: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Run terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
    Partial,
    Cancelled,
    Blocked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        }
    }
}

/// The full record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow: String,
    pub workflow_version_hash: String,
    pub status: RunStatus,
    /// Results in schedule order (deterministic given identical inputs)
    pub step_results: Vec<StepResult>,
    /// Resolved workflow outputs
    pub outputs: Value,
    /// Machine-readable summary
    pub summary: Value,
    /// Human message
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Total LLM spend for this run (USD)
    pub llm_cost: f64,
}

impl RunReport {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id.as_ref() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Ok.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::CircuitOpen.is_terminal());
    }

    #[test]
    fn test_success_states() {
        assert!(StepStatus::Ok.is_success());
        assert!(StepStatus::Cached.is_success());
        assert!(!StepStatus::Failed.is_success());
        assert!(!StepStatus::Skipped.is_success());
    }

    #[test]
    fn test_result_serializes_snake_case() {
        let result = StepResult::skipped("notify".into(), "when=false");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""status":"skipped"#));
    }
}
