//! `llm.summarize` - routed LLM completion for review material.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::llm::{LlmRequest, TaskKind};
use crate::registry::{Action, ActionContext, ActionDef, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;

pub struct SummarizeAction {
    def: ActionDef,
}

impl SummarizeAction {
    pub fn new() -> Self {
        let def = ActionDef::new(
            "llm.summarize",
            "Route a prompt through the model selector and return the completion",
        )
        .idempotency(IdempotencyClass::Read)
        .with_timeout(Duration::from_secs(120))
        .with_inputs(Schema::new(vec![
            FieldSpec::new("prompt", FieldType::String).required(),
            FieldSpec::new(
                "task",
                FieldType::Enum {
                    variants: vec![
                        "summarize".into(),
                        "analyze".into(),
                        "generate".into(),
                        "classify".into(),
                    ],
                },
            )
            .with_default(json!("summarize")),
            FieldSpec::new("model_hint", FieldType::String),
        ]))
        .with_outputs(Schema::new(vec![
            FieldSpec::new("text", FieldType::String).required(),
            FieldSpec::new("model", FieldType::String).required(),
            FieldSpec::new("cost_usd", FieldType::Float).required(),
        ]));
        Self { def }
    }
}

impl Default for SummarizeAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for SummarizeAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value> {
        let task = match inputs.get("task").and_then(Value::as_str) {
            Some("analyze") => TaskKind::Analyze,
            Some("generate") => TaskKind::Generate,
            Some("classify") => TaskKind::Classify,
            _ => TaskKind::Summarize,
        };
        let request = LlmRequest {
            task_kind: task,
            prompt: inputs
                .get("prompt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            context_refs: Vec::new(),
            model_hint: inputs
                .get("model_hint")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        // The router owns budgets and the prompt cache; the gate adds
        // breaker/retry on the llm endpoint around it.
        let router = ctx.router.clone();
        let budget = ctx.budget.clone();
        let deadline = ctx.deadline.clone();
        let request_ref = &request;
        let response = ctx
            .call_gated("llm", IdempotencyClass::Read, || {
                router.complete(request_ref, &budget, &deadline)
            })
            .await?;

        ctx.emitter.emit(crate::event::EventKind::ModelSelected {
            task: task.as_str().to_string(),
            model: response.model_used.clone(),
            estimated_cost: response.cost,
            score: response.quality_score,
        });
        ctx.emitter.emit(crate::event::EventKind::BudgetCharged {
            scope: "run".to_string(),
            amount: response.cost,
            remaining: ctx.budget.remaining(),
        });

        Ok(json!({
            "text": response.text,
            "model": response.model_used,
            "cost_usd": response.cost,
            "quality": response.quality_score,
            "cache_hit": response.cache_hit,
            "tokens_in": response.tokens_in,
            "tokens_out": response.tokens_out,
        }))
    }
}
