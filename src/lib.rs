//! AutoPR - pull-request automation orchestrator
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  workflow/  YAML → WorkflowSpec, StepSpec, Expr, StepGraph   │
//! │  review/    Finding/Issue pipeline (normalize→route→block)   │
//! │  detect/    Platform signatures and the weighted scorer      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  engine/    DAG execution (Engine, RunReport, Services)      │
//! │  actions/   Built-in actions registered at startup           │
//! │  registry/  ActionDef, typed schemas, ActionContext          │
//! │  worker.rs  Queue drain, per-PR serialization                │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  ingress/   Webhook auth, dedup, bounded queue               │
//! │  resilience/ Circuit breakers, rate limits, retry, gates     │
//! │  cache/     Content-addressed single-flight cache            │
//! │  llm/       Model routing, budgets, prompt cache             │
//! │  adapters/  VCS/tracker/chat/clock/secrets/LLM interfaces    │
//! │  event/     Audit log + NDJSON traces                        │
//! │  state/     Crash-safe run persistence                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`workflow`] | Declarative workflow files, `when:` expressions, DAG |
//! | [`engine`] | Stepwise execution with deterministic scheduling |
//! | [`registry`] | Action definitions with schema'd inputs/outputs |
//! | [`actions`] | The built-in action set |
//! | [`review`] | PR-review analyzer: findings → issues → merge gate |
//! | [`detect`] | Weighted-signature platform detection |
//! | [`llm`] | Model selection under budgets, prompt cache |
//! | [`ingress`] | Event intake: HMAC auth, dedup window, backpressure |
//! | [`resilience`] | Breakers, token buckets, jittered retry |
//! | [`cache`] | Namespaced content-addressed cache |
//! | [`adapters`] | External collaborators behind uniform traits |
//! | [`worker`] | Worker pool and per-PR run serialization |
//! | [`state`] | `runs/<run_id>/` persistence, atomic writes |
//! | [`event`] | Append-only audit trail |
//! | [`error`] | Coded errors over a closed taxonomy |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod detect;
pub mod review;
pub mod workflow;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod actions;
pub mod engine;
pub mod registry;
pub mod worker;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod adapters;
pub mod cache;
pub mod event;
pub mod ingress;
pub mod llm;
pub mod resilience;
pub mod state;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;
pub mod util;

#[cfg(test)]
mod test_support;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{AutoPrError, ErrorKind, FixSuggestion};

// Config
pub use config::{mask_secret, AutoPrConfig};

// Workflow (Domain Model)
pub use workflow::{Expr, OnFailure, StepGraph, StepSpec, Trigger, WorkflowSpec};

// Engine (Application Layer)
pub use engine::{Engine, RunReport, RunStatus, Services, StepResult, StepStatus};

// Registry
pub use registry::{Action, ActionContext, ActionDef, ActionRegistry, Schema};

// Review analyzer
pub use review::{
    Analyzer, AnalyzerConfig, Finding, FindingKind, Issue, ReviewerStream, Severity, Sink,
};

// Platform detection
pub use detect::{
    DetectionResult, Detector, PlatformMatch, PlatformSignature, RepoSnapshot, SignatureRegistry,
};

// LLM routing
pub use llm::{BudgetLedger, LlmRequest, LlmResponse, LlmRouter, ModelCatalog, RunBudget, TaskKind};

// Ingress
pub use ingress::{HookResponse, IngressHandler, RunQueue, WorkItem, WorkItemKind};

// Resilience
pub use resilience::{
    CircuitBreaker, CircuitState, IdempotencyClass, RateLimiter, RetryPolicy, ServiceGates,
};

// Shared infrastructure
pub use adapters::AdapterSet;
pub use cache::Cache;
pub use event::{Event, EventEmitter, EventKind, EventLog, NoopEmitter, TraceWriter};
pub use state::StateStore;
pub use util::Deadline;
pub use worker::{Dispatcher, PrLocks, WorkerPool};
