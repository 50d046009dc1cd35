//! Model selection and the routed completion path.
//!
//! Selection score per candidate:
//!
//! ```text
//! s(model) = 0.4·capability_fit + 0.3·complexity_fit + 0.3·cost_fit
//! ```
//!
//! where `cost_fit = min(budget_remaining / est_cost, 1)`. If the winner's
//! estimate would breach a cap, the router falls back to the cheapest
//! candidate with `capability_fit ≥ 0.5`; if none fits, the request fails
//! with `BudgetExceeded` before any external call. Prompt-cache hits are
//! free: they charge no budget at all.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::adapters::LlmAdapter;
use crate::cache::Cache;
use crate::error::{AutoPrError, Result};
use crate::util::Deadline;

use super::budget::{BudgetLedger, RunBudget};
use super::catalog::{complexity_score, ModelCatalog, ModelSpec};
use super::quality::quality_score;
use super::{LlmRequest, LlmResponse};

/// Prompt-cache namespace.
const PROMPT_CACHE_NS: &str = "llm";

/// Minimum quality for a response to be cached.
const QUALITY_CACHE_THRESHOLD: f64 = 0.6;

/// One routing decision, kept for future selection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRecord {
    pub task: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: f64,
    pub quality: f64,
}

/// The router: selects a model per task under budget constraints.
pub struct LlmRouter {
    catalog: ModelCatalog,
    cache: Arc<Cache>,
    ledger: Arc<BudgetLedger>,
    adapter: Arc<dyn LlmAdapter>,
    history: RwLock<Vec<RoutingRecord>>,
    /// Per-key single-flight guards for the prompt cache
    flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    quality_threshold: f64,
}

impl LlmRouter {
    pub fn new(
        catalog: ModelCatalog,
        cache: Arc<Cache>,
        ledger: Arc<BudgetLedger>,
        adapter: Arc<dyn LlmAdapter>,
    ) -> Self {
        Self {
            catalog,
            cache,
            ledger,
            adapter,
            history: RwLock::new(Vec::new()),
            flights: DashMap::new(),
            quality_threshold: QUALITY_CACHE_THRESHOLD,
        }
    }

    /// Routing history so far (most recent last).
    pub fn history(&self) -> Vec<RoutingRecord> {
        self.history.read().clone()
    }

    /// Route and execute one completion.
    pub async fn complete(
        &self,
        request: &LlmRequest,
        run_budget: &RunBudget,
        deadline: &Deadline,
    ) -> Result<LlmResponse> {
        let family = request.model_hint.as_deref().unwrap_or("any");
        let cache_inputs = json!({
            "prompt": request.prompt,
            "family": family,
            "task": request.task_kind.as_str(),
        });

        if let Some(hit) = self.cache.get(PROMPT_CACHE_NS, &cache_inputs) {
            return Ok(Self::cached_response(&hit));
        }

        // Single-flight per cache key: concurrent identical prompts wait for
        // one computation instead of each paying for a completion.
        let key = self.cache.key_for(PROMPT_CACHE_NS, &cache_inputs);
        let flight = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Re-check under the flight guard
        if let Some(hit) = self.cache.get(PROMPT_CACHE_NS, &cache_inputs) {
            drop(_guard);
            self.flights.remove(&key);
            return Ok(Self::cached_response(&hit));
        }

        let result = self
            .complete_uncached(request, run_budget, deadline)
            .await;

        if let Ok(ref response) = result {
            if response.quality_score >= self.quality_threshold {
                self.cache.put(
                    PROMPT_CACHE_NS,
                    &cache_inputs,
                    serde_json::to_value(response)?,
                );
            }
        }
        drop(_guard);
        self.flights.remove(&key);
        result
    }

    fn cached_response(stored: &serde_json::Value) -> LlmResponse {
        let mut response: LlmResponse = serde_json::from_value(stored.clone())
            .unwrap_or_else(|_| LlmResponse {
                text: stored.to_string(),
                model_used: "cache".into(),
                tokens_in: 0,
                tokens_out: 0,
                cost: 0.0,
                latency_ms: 0,
                quality_score: 1.0,
                cache_hit: true,
            });
        // Hits are free and instantaneous
        response.cost = 0.0;
        response.latency_ms = 0;
        response.cache_hit = true;
        response
    }

    async fn complete_uncached(
        &self,
        request: &LlmRequest,
        run_budget: &RunBudget,
        deadline: &Deadline,
    ) -> Result<LlmResponse> {
        let model = self.select_model(request, run_budget)?;
        let estimated = model.estimate_cost(&request.prompt);

        // Enforce both caps before any external call
        run_budget.try_charge(estimated)?;
        if let Err(e) = self.ledger.try_charge(estimated) {
            run_budget.release(estimated);
            return Err(e);
        }

        let completion = match self
            .adapter
            .complete(&model.id, &request.prompt, deadline)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                run_budget.release(estimated);
                self.ledger.release(estimated);
                return Err(e);
            }
        };

        let cost = model.actual_cost(completion.tokens_in, completion.tokens_out);
        run_budget.settle(estimated, cost);
        self.ledger.settle(estimated, cost);

        let quality = quality_score(&request.prompt, &completion.text);
        self.history.write().push(RoutingRecord {
            task: request.task_kind.as_str().to_string(),
            model: model.id.clone(),
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            cost,
            quality,
        });

        Ok(LlmResponse {
            text: completion.text,
            model_used: model.id.clone(),
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            cost,
            latency_ms: completion.latency_ms,
            quality_score: quality,
            cache_hit: false,
        })
    }

    /// Pick the best-scoring candidate that fits the budgets, falling back
    /// to the cheapest capable model, else `BudgetExceeded`.
    fn select_model(&self, request: &LlmRequest, run_budget: &RunBudget) -> Result<ModelSpec> {
        if self.catalog.models.is_empty() {
            return Err(AutoPrError::NoEligibleModel {
                task: request.task_kind.as_str().to_string(),
            });
        }

        let complexity = complexity_score(&request.prompt, request.task_kind);
        let remaining = run_budget.remaining().min(self.ledger.remaining());

        let mut best: Option<(f64, &ModelSpec)> = None;
        for model in &self.catalog.models {
            if let Some(hint) = request.model_hint.as_deref() {
                if model.family != hint && model.id != hint {
                    continue;
                }
            }
            let capability = model.capability_fit(request.task_kind);
            let complexity_fit = 1.0 - (complexity - model.complexity_tier).abs();
            let estimated = model.estimate_cost(&request.prompt);
            let cost_fit = if estimated <= 0.0 {
                1.0
            } else {
                (remaining / estimated).min(1.0)
            };
            let score = 0.4 * capability + 0.3 * complexity_fit + 0.3 * cost_fit;
            debug!(model = %model.id, score, estimated, "scored candidate");
            if best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, model));
            }
        }

        let (_, selected) = best.ok_or_else(|| AutoPrError::NoEligibleModel {
            task: request.task_kind.as_str().to_string(),
        })?;

        if selected.estimate_cost(&request.prompt) <= remaining {
            return Ok(selected.clone());
        }

        // Winner is over budget: cheapest candidate with capability ≥ 0.5
        let fallback = self
            .catalog
            .models
            .iter()
            .filter(|m| m.capability_fit(request.task_kind) >= 0.5)
            .filter(|m| m.estimate_cost(&request.prompt) <= remaining)
            .min_by(|a, b| {
                a.estimate_cost(&request.prompt)
                    .partial_cmp(&b.estimate_cost(&request.prompt))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        match fallback {
            Some(model) => Ok(model.clone()),
            None => Err(AutoPrError::BudgetExceeded {
                scope: "run".to_string(),
                estimated: selected.estimate_cost(&request.prompt),
                remaining,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryClock, MemoryLlm};
    use crate::llm::TaskKind;
    use std::time::Duration;

    fn router_with(llm: Arc<MemoryLlm>) -> LlmRouter {
        let clock = Arc::new(MemoryClock::default());
        LlmRouter::new(
            ModelCatalog::builtin(),
            Arc::new(Cache::new()),
            Arc::new(BudgetLedger::new(10.0, 100.0, clock)),
            llm,
        )
    }

    fn request(prompt: &str) -> LlmRequest {
        LlmRequest {
            task_kind: TaskKind::Analyze,
            prompt: prompt.to_string(),
            context_refs: vec![],
            model_hint: None,
        }
    }

    #[tokio::test]
    async fn test_complete_and_record_history() {
        let llm = Arc::new(MemoryLlm::default());
        llm.respond_with(
            "auth.go",
            "The credential handling in auth.go must change: replace the literal with an env lookup.\n- Replace the constant.\n- Add a test.",
        );
        let router = router_with(llm.clone());

        let response = router
            .complete(
                &request("Analyze the review findings for auth.go credential handling"),
                &RunBudget::new(1.0),
                &Deadline::after(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert!(!response.cache_hit);
        assert!(response.cost > 0.0);
        assert_eq!(router.history().len(), 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_is_free_and_skips_adapter() {
        let llm = Arc::new(MemoryLlm::default());
        llm.respond_with(
            "auth.go",
            "Replace the hardcoded credential in auth.go with an env lookup; add a regression test covering the constant path.",
        );
        let router = router_with(llm.clone());
        let budget = RunBudget::new(1.0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let req = request("Analyze the review findings for auth.go credential handling");

        let first = router.complete(&req, &budget, &deadline).await.unwrap();
        assert!(first.quality_score >= 0.6, "quality {}", first.quality_score);
        let spent_after_first = budget.spent();

        let second = router.complete(&req, &budget, &deadline).await.unwrap();
        assert!(second.cache_hit);
        assert!(second.cost.abs() < f64::EPSILON);
        assert_eq!(second.text, first.text);
        // Hits charge nothing
        assert!((budget.spent() - spent_after_first).abs() < 1e-12);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_low_quality_not_cached() {
        let llm = Arc::new(MemoryLlm::default());
        llm.respond_with("flaky", "I cannot");
        let router = router_with(llm.clone());
        let budget = RunBudget::new(1.0);
        let deadline = Deadline::after(Duration::from_secs(5));
        let req = request("flaky please analyze");

        let first = router.complete(&req, &budget, &deadline).await.unwrap();
        assert!(first.quality_score < 0.6);

        let second = router.complete(&req, &budget, &deadline).await.unwrap();
        assert!(!second.cache_hit);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_budget_fallback_to_cheapest() {
        let llm = Arc::new(MemoryLlm::default());
        let router = router_with(llm.clone());
        // Large prompt makes large-capable too expensive for this cap, but
        // small-fast still fits
        let prompt = "x".repeat(8000);
        let budget = RunBudget::new(0.002);

        let response = router
            .complete(&request(&prompt), &budget, &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.model_used, "small-fast");
    }

    #[tokio::test]
    async fn test_budget_exhaustion_fails_before_call() {
        let llm = Arc::new(MemoryLlm::default());
        let router = router_with(llm.clone());
        let prompt = "x".repeat(80_000);
        let budget = RunBudget::new(0.000001);

        let err = router
            .complete(&request(&prompt), &budget, &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "APR-060");
        // No external call was made, nothing was spent
        assert_eq!(llm.call_count(), 0);
        assert!(budget.spent().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failed_call_releases_reservation() {
        let llm = Arc::new(MemoryLlm::default());
        llm.fail_next(1);
        let router = router_with(llm.clone());
        let budget = RunBudget::new(1.0);
        let deadline = Deadline::after(Duration::from_secs(5));

        let err = router
            .complete(&request("will fail"), &budget, &deadline)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert!(budget.spent().abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_model_hint_restricts_candidates() {
        let llm = Arc::new(MemoryLlm::default());
        let router = router_with(llm.clone());
        let mut req = request("short analysis request");
        req.model_hint = Some("large".to_string());

        let response = router
            .complete(&req, &RunBudget::new(1.0), &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.model_used, "large-capable");
    }
}
