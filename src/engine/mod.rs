//! Workflow Engine
//!
//! Drives stepwise execution of a parsed workflow: topological order with
//! deterministic tie-breaks, `when:` conditions, output→input wiring,
//! per-step timeouts under the run deadline, failure policies, and
//! engine-level caching for actions that opt in.

pub mod result;
pub mod runner;

pub use result::{RunReport, RunStatus, StepResult, StepStatus};
pub use runner::Engine;

use std::sync::Arc;

use crate::adapters::memory::MemoryHandles;
use crate::adapters::AdapterSet;
use crate::cache::Cache;
use crate::config::AutoPrConfig;
use crate::detect::SignatureRegistry;
use crate::error::Result;
use crate::llm::{BudgetLedger, LlmRouter, ModelCatalog};
use crate::resilience::ServiceGates;
use crate::review::{Analyzer, AnalyzerConfig, Severity};

fn analyzer_from_config(config: &AutoPrConfig) -> Analyzer {
    Analyzer::new(AnalyzerConfig {
        severity_threshold: Severity::parse(&config.review.severity_threshold)
            .unwrap_or(Severity::Low),
        min_confidence: config.review.min_confidence,
        ..Default::default()
    })
}

/// Process-wide shared services: cache, resilience state, adapters, the
/// LLM router, signature registry and analyzer. Created once at startup,
/// shared by every run.
pub struct Services {
    pub config: AutoPrConfig,
    pub cache: Arc<Cache>,
    pub gates: Arc<ServiceGates>,
    pub adapters: Arc<AdapterSet>,
    pub router: Arc<LlmRouter>,
    pub signatures: Arc<SignatureRegistry>,
    pub analyzer: Arc<Analyzer>,
}

impl Services {
    /// Wire services around a concrete adapter set.
    pub fn new(config: AutoPrConfig, adapters: AdapterSet) -> Result<Arc<Self>> {
        let cache = Arc::new(Cache::new().with_disk_root(config.state_dir().join("cache")));
        let gates = Arc::new(ServiceGates::new(&config.resilience));
        let adapters = Arc::new(adapters);
        let ledger = Arc::new(BudgetLedger::new(
            config.budgets.daily_usd,
            config.budgets.monthly_usd,
            adapters.clock.clone(),
        ));
        let router = Arc::new(LlmRouter::new(
            ModelCatalog::builtin(),
            Arc::clone(&cache),
            ledger,
            adapters.llm.clone(),
        ));
        let signatures = Arc::new(SignatureRegistry::builtin()?);
        let analyzer = Arc::new(analyzer_from_config(&config));

        Ok(Arc::new(Self {
            config,
            cache,
            gates,
            adapters,
            router,
            signatures,
            analyzer,
        }))
    }

    /// Fully in-memory services for tests and dry runs. The cache is
    /// memory-only (no disk root).
    pub fn in_memory(config: AutoPrConfig) -> Result<(Arc<Self>, MemoryHandles)> {
        let (adapters, handles) = AdapterSet::in_memory();
        let cache = Arc::new(Cache::new());
        let gates = Arc::new(ServiceGates::new(&config.resilience));
        let adapters = Arc::new(adapters);
        let ledger = Arc::new(BudgetLedger::new(
            config.budgets.daily_usd,
            config.budgets.monthly_usd,
            adapters.clock.clone(),
        ));
        let router = Arc::new(LlmRouter::new(
            ModelCatalog::builtin(),
            Arc::clone(&cache),
            ledger,
            adapters.llm.clone(),
        ));
        let signatures = Arc::new(SignatureRegistry::builtin()?);
        let analyzer = Arc::new(analyzer_from_config(&config));

        Ok((
            Arc::new(Self {
                config,
                cache,
                gates,
                adapters,
                router,
                signatures,
                analyzer,
            }),
            handles,
        ))
    }
}
