//! LLM Router & Cost Optimizer
//!
//! Per request: prompt-cache lookup (hits are free), content-complexity
//! scoring, model selection under per-run and per-window budgets, response
//! quality scoring, and conditional cache write-back. The orchestrator
//! never hosts models; completions go through the [`LlmAdapter`]
//! (`adapters` module).

pub mod budget;
pub mod catalog;
pub mod quality;
pub mod router;

pub use budget::{BudgetLedger, RunBudget};
pub use catalog::{complexity_score, ModelCatalog, ModelSpec};
pub use quality::quality_score;
pub use router::{LlmRouter, RoutingRecord};

use serde::{Deserialize, Serialize};

/// Closed set of LLM task kinds the router knows how to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Short free-form summaries (PR descriptions, chat digests)
    Summarize,
    /// Multi-finding review analysis
    Analyze,
    /// Code or fix generation
    Generate,
    /// Cheap label/boolean classification
    Classify,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Analyze => "analyze",
            Self::Generate => "generate",
            Self::Classify => "classify",
        }
    }
}

/// A routed LLM request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub task_kind: TaskKind,
    pub prompt: String,
    /// Opaque references to context already held by the gateway
    #[serde(default)]
    pub context_refs: Vec<String>,
    /// Preferred model family, if the caller has one
    #[serde(default)]
    pub model_hint: Option<String>,
}

/// A completed LLM response with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model_used: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// USD; zero for prompt-cache hits
    pub cost: f64,
    pub latency_ms: u64,
    /// [0, 1] heuristic quality
    pub quality_score: f64,
    /// Served from the prompt cache
    pub cache_hit: bool,
}
