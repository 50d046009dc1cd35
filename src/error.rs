//! AutoPR Error Types with Error Codes
//!
//! Error code ranges:
//! - APR-000-009: Ingress errors (signature, payload, queue)
//! - APR-010-019: Workflow load/validation errors
//! - APR-020-029: Schema/input errors
//! - APR-030-039: Engine/time errors
//! - APR-040-049: Resilience errors
//! - APR-050-059: Adapter/credential errors
//! - APR-060-069: LLM routing/budget errors
//! - APR-070-079: Review analyzer errors
//! - APR-080-089: Platform detector errors
//! - APR-090-099: IO/serde/config/state errors
//! - APR-100:     Internal (last resort, always logged with run context)
//!
//! Every variant maps into the closed [`ErrorKind`] taxonomy via
//! [`AutoPrError::kind`]; retry and HTTP-status decisions are made on the
//! taxonomy, never on message strings.

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutoPrError>;

/// Closed error taxonomy carried on all errors.
///
/// The set is fixed: components cannot introduce new kinds. Retry policy and
/// ingress HTTP mapping are both derived from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    InvalidWorkflow,
    UnresolvedReference,
    SchemaMismatch,
    Timeout,
    Cancelled,
    Deadline,
    RateLimited,
    CircuitOpen,
    Transport,
    AuthFailed,
    Forbidden,
    BudgetExceeded,
    Conflict,
    Internal,
}

impl ErrorKind {
    /// HTTP status the ingress responds with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput
            | Self::InvalidWorkflow
            | Self::UnresolvedReference
            | Self::SchemaMismatch => 400,
            Self::AuthFailed => 401,
            Self::Forbidden => 403,
            Self::Conflict => 409,
            Self::RateLimited | Self::BudgetExceeded => 429,
            Self::Transport | Self::CircuitOpen => 503,
            Self::Timeout | Self::Cancelled | Self::Deadline => 504,
            Self::Internal => 500,
        }
    }

    /// Whether this kind is transient enough that a retry can help at all.
    ///
    /// Idempotency class narrows this further: effectful actions retry only
    /// on `Transport` (see `resilience::retry`).
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Transport
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidWorkflow => "invalid_workflow",
            Self::UnresolvedReference => "unresolved_reference",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Deadline => "deadline",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::Transport => "transport",
            Self::AuthFailed => "auth_failed",
            Self::Forbidden => "forbidden",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
#[diagnostic(url(docsrs))]
pub enum AutoPrError {
    // ═══════════════════════════════════════════
    // INGRESS ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[APR-001] Invalid webhook signature for source '{event_source}'")]
    #[diagnostic(
        code(autopr::invalid_signature),
        help("Check the shared secret configured for this event source")
    )]
    InvalidSignature { event_source: String },

    #[error("[APR-002] Malformed event payload from '{event_source}': {details}")]
    #[diagnostic(
        code(autopr::malformed_payload),
        help("Payload must be valid JSON with repo and pr_number fields")
    )]
    MalformedPayload { event_source: String, details: String },

    #[error("[APR-003] Run queue full ({capacity} items); retry after {retry_after_secs}s")]
    #[diagnostic(
        code(autopr::queue_full),
        help("The orchestrator is at capacity; back off and retry")
    )]
    QueueFull {
        capacity: usize,
        retry_after_secs: u64,
    },

    #[error("[APR-004] Unknown event source '{event_source}'")]
    UnknownSource { event_source: String },

    // ═══════════════════════════════════════════
    // WORKFLOW LOAD/VALIDATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[APR-010] Failed to parse workflow: {details}")]
    #[diagnostic(
        code(autopr::workflow_parse),
        help("Check YAML syntax: indentation and quoting")
    )]
    WorkflowParse { details: String },

    #[error("[APR-011] Invalid workflow '{workflow}': {reason}")]
    #[diagnostic(
        code(autopr::invalid_workflow),
        help("Check workflow structure: name, version, triggers, steps")
    )]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("[APR-012] Cycle detected in step graph: {cycle}")]
    #[diagnostic(
        code(autopr::cycle_detected),
        help("Remove circular step references from the workflow")
    )]
    CycleDetected { cycle: String },

    #[error("[APR-013] Step '{step_id}' references unknown step '{dep_id}'")]
    MissingDependency { step_id: String, dep_id: String },

    #[error("[APR-014] Duplicate step id '{step_id}'")]
    DuplicateStep { step_id: String },

    #[error("[APR-015] Step '{step_id}' falls back to unknown step '{fallback_id}'")]
    UnknownFallback {
        step_id: String,
        fallback_id: String,
    },

    #[error("[APR-016] Workflow '{workflow}' declares no triggers")]
    #[diagnostic(
        code(autopr::no_triggers),
        help("Add at least one entry to the triggers list")
    )]
    NoTriggers { workflow: String },

    #[error("[APR-017] Invalid expression at position {position}: {details}")]
    #[diagnostic(
        code(autopr::expr_parse),
        help("Conditions support literals, field access, comparisons, and len/contains/in")
    )]
    ExprParse { position: usize, details: String },

    #[error("[APR-018] Expression type error: {details}")]
    ExprType { details: String },

    // ═══════════════════════════════════════════
    // SCHEMA/INPUT ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[APR-020] Invalid input for '{location}': {reason}")]
    #[diagnostic(
        code(autopr::invalid_input),
        help("Check the value against the action's declared input schema")
    )]
    InvalidInput { location: String, reason: String },

    #[error("[APR-021] Schema mismatch at '{location}': expected {expected}, got {actual}")]
    SchemaMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("[APR-022] Unresolved reference '{reference}' in step '{step_id}'")]
    #[diagnostic(
        code(autopr::unresolved_reference),
        help("References use ${{{{ steps.<id>.outputs.<field> }}}} and must point at a prior step")
    )]
    UnresolvedReference { step_id: String, reference: String },

    // ═══════════════════════════════════════════
    // ENGINE/TIME ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[APR-030] Step '{step_id}' timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    #[error("[APR-031] Run '{run_id}' cancelled")]
    RunCancelled { run_id: String },

    #[error("[APR-032] Deadline exceeded in '{operation}'")]
    DeadlineExceeded { operation: String },

    #[error("[APR-033] PR {repo}#{pr_number} is busy with another run")]
    #[diagnostic(
        code(autopr::pr_busy),
        help("Runs for the same PR are serialized; retry once the active run finishes")
    )]
    PrBusy { repo: String, pr_number: u64 },

    #[error("[APR-034] Duplicate action '{name}' registered")]
    DuplicateAction { name: String },

    #[error("[APR-035] Unknown action '{name}' referenced by step '{step_id}'")]
    UnknownAction { name: String, step_id: String },

    // ═══════════════════════════════════════════
    // RESILIENCE ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[APR-040] Circuit open for endpoint '{endpoint}'")]
    #[diagnostic(
        code(autopr::circuit_open),
        help("The endpoint failed repeatedly; calls resume after the reset window")
    )]
    CircuitOpen { endpoint: String },

    #[error("[APR-041] Rate limited on '{service}': {reason}")]
    RateLimited { service: String, reason: String },

    #[error("[APR-042] Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("[APR-043] Transport error calling '{endpoint}': {details}")]
    Transport { endpoint: String, details: String },

    // ═══════════════════════════════════════════
    // ADAPTER/CREDENTIAL ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[APR-050] Authentication failed for '{service}'")]
    #[diagnostic(
        code(autopr::auth_failed),
        help("Check the credential env var resolved by the secrets adapter")
    )]
    AuthFailed { service: String },

    #[error("[APR-051] Forbidden: '{service}' denied {operation}")]
    Forbidden { service: String, operation: String },

    #[error("[APR-052] Conflict on '{resource}': {details}")]
    Conflict { resource: String, details: String },

    #[error("[APR-053] Secret '{key}' not available")]
    MissingSecret { key: String },

    // ═══════════════════════════════════════════
    // LLM ROUTING/BUDGET ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[APR-060] Budget exceeded: estimated ${estimated:.4} over remaining ${remaining:.4} ({scope})")]
    #[diagnostic(
        code(autopr::budget_exceeded),
        help("Raise the budget cap in config or route the task to a cheaper model")
    )]
    BudgetExceeded {
        scope: String,
        estimated: f64,
        remaining: f64,
    },

    #[error("[APR-061] No model in the candidate set can serve task '{task}'")]
    NoEligibleModel { task: String },

    // ═══════════════════════════════════════════
    // REVIEW ANALYZER ERRORS (070-079)
    // ═══════════════════════════════════════════
    #[error("[APR-070] No routing rule matched finding '{finding_id}' ({kind}/{severity})")]
    UnroutedFinding {
        finding_id: String,
        kind: String,
        severity: String,
    },

    #[error("[APR-071] Unknown sink '{sink}' in routing rule")]
    UnknownSink { sink: String },

    // ═══════════════════════════════════════════
    // PLATFORM DETECTOR ERRORS (080-089)
    // ═══════════════════════════════════════════
    #[error("[APR-080] Invalid pattern '{pattern}' in signature '{platform_id}': {details}")]
    InvalidPattern {
        platform_id: String,
        pattern: String,
        details: String,
    },

    #[error("[APR-081] Signature '{platform_id}' channel weights sum to {sum:.2} (must be <= 1.0)")]
    InvalidWeights { platform_id: String, sum: f64 },

    // ═══════════════════════════════════════════
    // IO / SERDE / CONFIG / STATE ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[APR-090] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[APR-091] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[APR-092] YAML parse error: {0}")]
    #[diagnostic(
        code(autopr::yaml_parse),
        help("Check YAML syntax: indentation must be consistent, strings with special chars need quoting")
    )]
    Yaml(#[from] serde_yaml::Error),

    #[error("[APR-093] Config error: {reason}")]
    Config { reason: String },

    #[error("[APR-094] State error at '{path}': {reason}")]
    State { path: String, reason: String },

    // ═══════════════════════════════════════════
    // INTERNAL (100)
    // ═══════════════════════════════════════════
    #[error("[APR-100] Internal error: {details}")]
    Internal { details: String },
}

impl AutoPrError {
    /// Get the error code (e.g., "APR-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature { .. } => "APR-001",
            Self::MalformedPayload { .. } => "APR-002",
            Self::QueueFull { .. } => "APR-003",
            Self::UnknownSource { .. } => "APR-004",
            Self::WorkflowParse { .. } => "APR-010",
            Self::InvalidWorkflow { .. } => "APR-011",
            Self::CycleDetected { .. } => "APR-012",
            Self::MissingDependency { .. } => "APR-013",
            Self::DuplicateStep { .. } => "APR-014",
            Self::UnknownFallback { .. } => "APR-015",
            Self::NoTriggers { .. } => "APR-016",
            Self::ExprParse { .. } => "APR-017",
            Self::ExprType { .. } => "APR-018",
            Self::InvalidInput { .. } => "APR-020",
            Self::SchemaMismatch { .. } => "APR-021",
            Self::UnresolvedReference { .. } => "APR-022",
            Self::StepTimeout { .. } => "APR-030",
            Self::RunCancelled { .. } => "APR-031",
            Self::DeadlineExceeded { .. } => "APR-032",
            Self::PrBusy { .. } => "APR-033",
            Self::DuplicateAction { .. } => "APR-034",
            Self::UnknownAction { .. } => "APR-035",
            Self::CircuitOpen { .. } => "APR-040",
            Self::RateLimited { .. } => "APR-041",
            Self::RetryExhausted { .. } => "APR-042",
            Self::Transport { .. } => "APR-043",
            Self::AuthFailed { .. } => "APR-050",
            Self::Forbidden { .. } => "APR-051",
            Self::Conflict { .. } => "APR-052",
            Self::MissingSecret { .. } => "APR-053",
            Self::BudgetExceeded { .. } => "APR-060",
            Self::NoEligibleModel { .. } => "APR-061",
            Self::UnroutedFinding { .. } => "APR-070",
            Self::UnknownSink { .. } => "APR-071",
            Self::InvalidPattern { .. } => "APR-080",
            Self::InvalidWeights { .. } => "APR-081",
            Self::Io(_) => "APR-090",
            Self::Json(_) => "APR-091",
            Self::Yaml(_) => "APR-092",
            Self::Config { .. } => "APR-093",
            Self::State { .. } => "APR-094",
            Self::Internal { .. } => "APR-100",
        }
    }

    /// Map this error into the closed taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSignature { .. } | Self::AuthFailed { .. } => ErrorKind::AuthFailed,
            Self::MalformedPayload { .. }
            | Self::UnknownSource { .. }
            | Self::InvalidInput { .. }
            | Self::Config { .. } => ErrorKind::InvalidInput,
            // Backpressure is infrastructure, not a client quota: the caller
            // gets 503 + Retry-After, mapped specially by the ingress.
            Self::QueueFull { .. } => ErrorKind::Transport,
            Self::WorkflowParse { .. }
            | Self::InvalidWorkflow { .. }
            | Self::CycleDetected { .. }
            | Self::MissingDependency { .. }
            | Self::DuplicateStep { .. }
            | Self::UnknownFallback { .. }
            | Self::NoTriggers { .. }
            | Self::ExprParse { .. }
            | Self::ExprType { .. }
            | Self::DuplicateAction { .. }
            | Self::UnknownAction { .. }
            | Self::UnknownSink { .. }
            | Self::UnroutedFinding { .. }
            | Self::InvalidPattern { .. }
            | Self::InvalidWeights { .. }
            | Self::Yaml(_) => ErrorKind::InvalidWorkflow,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,
            Self::StepTimeout { .. } => ErrorKind::Timeout,
            Self::RunCancelled { .. } => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorKind::Deadline,
            Self::PrBusy { .. } | Self::Conflict { .. } => ErrorKind::Conflict,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::RetryExhausted { .. } | Self::Transport { .. } => ErrorKind::Transport,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::MissingSecret { .. } => ErrorKind::AuthFailed,
            Self::BudgetExceeded { .. } | Self::NoEligibleModel { .. } => {
                ErrorKind::BudgetExceeded
            }
            Self::Io(_) | Self::Json(_) | Self::State { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }
}

impl FixSuggestion for AutoPrError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidSignature { .. } => {
                Some("Check the shared secret configured for this event source")
            }
            Self::MalformedPayload { .. } => {
                Some("Payload must be valid JSON with repo and pr_number fields")
            }
            Self::QueueFull { .. } => Some("Back off and retry after the advertised delay"),
            Self::UnknownSource { .. } => Some("Register the event source in config.toml"),
            Self::WorkflowParse { .. } | Self::Yaml(_) => {
                Some("Check YAML syntax: indentation and quoting")
            }
            Self::InvalidWorkflow { .. } => {
                Some("Check workflow structure: name, version, triggers, steps")
            }
            Self::CycleDetected { .. } => Some("Remove circular step references"),
            Self::MissingDependency { .. } => {
                Some("Add the missing step or fix the reference")
            }
            Self::DuplicateStep { .. } => Some("Step ids must be unique within a workflow"),
            Self::UnknownFallback { .. } => {
                Some("on_failure: fallback(<id>) must name an existing step")
            }
            Self::NoTriggers { .. } => Some("Add at least one entry to the triggers list"),
            Self::ExprParse { .. } => {
                Some("Conditions support literals, field access, comparisons, and len/contains/in")
            }
            Self::ExprType { .. } => Some("A when: expression must evaluate to a boolean"),
            Self::InvalidInput { .. } => {
                Some("Check the value against the action's declared input schema")
            }
            Self::SchemaMismatch { .. } => Some("Fix the value type to match the schema"),
            Self::UnresolvedReference { .. } => {
                Some("References must point at a completed upstream step output")
            }
            Self::StepTimeout { .. } => Some("Increase the step timeout or the run deadline"),
            Self::RunCancelled { .. } => None,
            Self::DeadlineExceeded { .. } => Some("Increase the run deadline in config"),
            Self::PrBusy { .. } => Some("Retry once the active run for this PR finishes"),
            Self::DuplicateAction { .. } => Some("Action names must be unique at registration"),
            Self::UnknownAction { .. } => Some("Register the action before loading workflows"),
            Self::CircuitOpen { .. } => {
                Some("The endpoint failed repeatedly; calls resume after the reset window")
            }
            Self::RateLimited { .. } => Some("Lower the request rate or raise the bucket capacity"),
            Self::RetryExhausted { .. } => Some("Check the endpoint health and retry limits"),
            Self::Transport { .. } => Some("Check network connectivity and endpoint availability"),
            Self::AuthFailed { .. } | Self::MissingSecret { .. } => {
                Some("Check the credential env var resolved by the secrets adapter")
            }
            Self::Forbidden { .. } => Some("The credential lacks the required scope"),
            Self::Conflict { .. } => {
                Some("A resource with this idempotency key already exists")
            }
            Self::BudgetExceeded { .. } => {
                Some("Raise the budget cap in config or route the task to a cheaper model")
            }
            Self::NoEligibleModel { .. } => {
                Some("Add a model advertising this task kind to the catalog")
            }
            Self::UnroutedFinding { .. } => {
                Some("Add a routing rule covering this kind/severity combination")
            }
            Self::UnknownSink { .. } => {
                Some("Sinks are tracker, vcs_issue, chat, email")
            }
            Self::InvalidPattern { .. } => Some("Check glob/regex syntax in the signature"),
            Self::InvalidWeights { .. } => Some("Channel weights must sum to at most 1.0"),
            Self::Io(_) => Some("Check file path and permissions"),
            Self::Json(_) => Some("Check JSON syntax"),
            Self::Config { .. } => Some("Check config.toml for syntax errors"),
            Self::State { .. } => Some("Check AUTOPR_STATE_DIR exists and is writable"),
            Self::Internal { .. } => None,
        }
    }
}
