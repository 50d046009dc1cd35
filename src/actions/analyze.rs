//! `review.analyze` - merge reviewer streams into a canonical issue list.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::registry::{Action, ActionContext, ActionDef, Constraints, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;

pub struct AnalyzeReviewsAction {
    def: ActionDef,
}

impl AnalyzeReviewsAction {
    pub fn new() -> Self {
        let def = ActionDef::new(
            "review.analyze",
            "Normalize, dedupe, filter and route reviewer findings",
        )
        .idempotency(IdempotencyClass::Read)
        .with_timeout(Duration::from_secs(60))
        .with_scopes(&["vcs:read"])
        .with_inputs(Schema::new(vec![
            FieldSpec::new("repo", FieldType::String),
            FieldSpec::new("pr_number", FieldType::Int),
            // A review pass over zero files is a caller bug, not a no-op
            FieldSpec::new(
                "files",
                FieldType::List {
                    item: Box::new(FieldType::String),
                },
            )
            .required()
            .with_constraints(Constraints {
                min_len: Some(1),
                ..Default::default()
            }),
        ]))
        .with_outputs(Schema::new(vec![
            FieldSpec::new("merge_block", FieldType::Bool).required(),
            FieldSpec::new("finding_count", FieldType::Int).required(),
            FieldSpec::new("issue_count", FieldType::Int).required(),
        ]));
        Self { def }
    }
}

impl Default for AnalyzeReviewsAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for AnalyzeReviewsAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value> {
        let repo = inputs
            .get("repo")
            .and_then(Value::as_str)
            .unwrap_or(&ctx.work_item.source_repo)
            .to_string();
        let pr_number = inputs
            .get("pr_number")
            .and_then(Value::as_u64)
            .unwrap_or(ctx.work_item.pr_number);

        let reviews = ctx.adapters.reviews.clone();
        let deadline = ctx.deadline.clone();
        let streams = ctx
            .call_gated("reviews", IdempotencyClass::Read, || {
                reviews.fetch_streams(&repo, pr_number, &deadline)
            })
            .await?;

        let report = ctx.analyzer.analyze(&ctx.run_id, &streams);

        for issue in &report.issues {
            ctx.emitter.emit(crate::event::EventKind::FindingRouted {
                finding_id: issue.correlates_to.clone(),
                sinks: vec![issue.sink.as_str().to_string()],
            });
        }
        if report.merge_block {
            ctx.emitter.emit(crate::event::EventKind::MergeBlocked {
                reasons: report.block_reasons.clone(),
            });
        }

        let finding_count = report.findings.len();
        let issue_count = report.issues.len();
        let summary = format!(
            "{} findings, {} issues{}",
            finding_count,
            issue_count,
            if report.merge_block {
                " (merge blocked)"
            } else {
                ""
            }
        );

        Ok(json!({
            "merge_block": report.merge_block,
            "block_reasons": report.block_reasons,
            "findings": report.findings,
            "issues": report.issues,
            "unrouted": report.unrouted,
            "finding_count": finding_count,
            "issue_count": issue_count,
            "summary": summary,
            "schema_version": report.schema_version,
        }))
    }
}

impl AnalyzeReviewsAction {
    /// Validate a `with:` block against the declared input schema.
    pub fn validate_inputs(&self, inputs: &Value) -> Result<Value> {
        self.def.input_schema.validate(inputs, "review.analyze.with")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::review::{RawFinding, ReviewerStream};
    use crate::test_support::action_context;

    #[test]
    fn test_empty_file_list_is_invalid_input_not_a_crash() {
        let action = AnalyzeReviewsAction::new();
        let err = action
            .validate_inputs(&json!({"files": []}))
            .unwrap_err();
        assert_eq!(err.code(), "APR-020");
    }

    #[tokio::test]
    async fn test_analyze_produces_issues_and_block_flag() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        handles.reviews.set_streams(vec![ReviewerStream {
            source: "semgrep".into(),
            findings: vec![RawFinding {
                source: "semgrep".into(),
                kind: "security".into(),
                severity: "critical".into(),
                file: "auth.go".into(),
                line: 42,
                title: "hardcoded key".into(),
                body: String::new(),
                suggested_fix: None,
                confidence: 0.95,
                tags: vec![],
            }],
        }]);

        let ctx = action_context(&services, "octo/widgets", 42);
        let action = AnalyzeReviewsAction::new();
        let out = action
            .run(&ctx, json!({"files": ["auth.go"]}))
            .await
            .unwrap();

        assert_eq!(out["merge_block"], true);
        assert_eq!(out["finding_count"], 1);
        // Critical security escalates to tracker + chat
        assert_eq!(out["issue_count"], 2);
    }
}
