//! Declarative workflows: file format, expressions, references, DAG.

pub mod expr;
pub mod graph;
pub mod reference;
pub mod spec;

pub use expr::Expr;
pub use graph::StepGraph;
pub use reference::{
    extract_step_refs, parse_ref, resolve_value, step_refs_in_text, RefTarget, ResolutionContext,
};
pub use spec::{parse_duration, InputSpec, OnFailure, StepSpec, Trigger, WorkflowSpec};
