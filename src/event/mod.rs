//! Event sourcing for the run audit trail.

pub mod emitter;
pub mod log;
pub mod trace;

pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
pub use trace::{read_trace, TraceWriter};
