//! EventEmitter trait - abstraction for event emission
//!
//! Enables dependency injection for testing - a real EventLog in production,
//! NoopEmitter in tests that don't assert on events.

use super::log::{EventKind, EventLog};

/// Trait for emitting events during run execution
pub trait EventEmitter: Send + Sync {
    /// Emit an event and return its ID
    fn emit(&self, kind: EventKind) -> u64;
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        EventLog::emit(self, kind)
    }
}

/// No-op emitter for tests (zero allocation, always returns 0)
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn event_emitter_trait_is_object_safe() {
        fn accepts_emitter(_: &dyn EventEmitter) {}

        let log = EventLog::new();
        accepts_emitter(&log);
        accepts_emitter(&NoopEmitter::new());
    }

    #[test]
    fn event_emitter_works_with_arc() {
        let emitter: Arc<dyn EventEmitter> = Arc::new(EventLog::new());
        let id = emitter.emit(EventKind::RunStarted {
            run_id: "run-1".into(),
            workflow: "w".into(),
            workflow_hash: "h".into(),
            step_count: 1,
        });
        assert_eq!(id, 0);
    }

    #[test]
    fn noop_emitter_returns_zero() {
        let noop = NoopEmitter::new();
        for _ in 0..3 {
            assert_eq!(
                noop.emit(EventKind::MergeBlocked { reasons: vec![] }),
                0
            );
        }
    }
}
