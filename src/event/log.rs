//! EventLog - append-only audit trail for run execution
//!
//! - `Event`: envelope with id + timestamp + kind
//! - `EventKind`: run / step / adapter / analyzer / router levels
//! - `EventLog`: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All possible event types.
///
/// Uses Arc<str> for step_id fields to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        run_id: String,
        workflow: String,
        workflow_hash: String,
        step_count: usize,
    },
    RunCompleted {
        run_id: String,
        status: String,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepScheduled {
        step_id: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    StepStarted {
        step_id: Arc<str>,
        /// Resolved inputs (what the action receives)
        inputs: Value,
    },
    StepCompleted {
        step_id: Arc<str>,
        output: Arc<Value>,
        duration_ms: u64,
        attempts: u32,
        cache_hit: bool,
    },
    StepFailed {
        step_id: Arc<str>,
        error: String,
        error_kind: String,
        duration_ms: u64,
    },
    StepSkipped {
        step_id: Arc<str>,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // ADAPTER LEVEL
    // ═══════════════════════════════════════════
    AdapterCalled {
        endpoint: String,
        operation: String,
    },
    AdapterResponded {
        endpoint: String,
        operation: String,
        ok: bool,
        latency_ms: u64,
    },

    // ═══════════════════════════════════════════
    // ANALYZER / ROUTER LEVEL
    // ═══════════════════════════════════════════
    FindingRouted {
        finding_id: String,
        sinks: Vec<String>,
    },
    MergeBlocked {
        reasons: Vec<String>,
    },
    ModelSelected {
        task: String,
        model: String,
        estimated_cost: f64,
        score: f64,
    },
    BudgetCharged {
        scope: String,
        amount: f64,
        remaining: f64,
    },
}

/// Thread-safe, append-only event log. One per run.
#[derive(Clone, Debug)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    next_id: Arc<AtomicU64>,
    start: Arc<Instant>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            start: Arc::new(Instant::now()),
        }
    }

    /// Append an event; returns its sequence id.
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
