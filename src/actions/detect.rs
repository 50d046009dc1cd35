//! `platform.detect` - score the repository against platform signatures.

use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde_json::{json, Value};

use crate::detect::{Detector, RepoSnapshot};
use crate::error::Result;
use crate::registry::{Action, ActionContext, ActionDef, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;

pub struct DetectPlatformAction {
    def: ActionDef,
}

impl DetectPlatformAction {
    pub fn new() -> Self {
        let string_list = || FieldType::List {
            item: Box::new(FieldType::String),
        };
        let def = ActionDef::new(
            "platform.detect",
            "Score the repository against the platform signature library",
        )
        .idempotency(IdempotencyClass::Pure)
        .cacheable()
        .with_timeout(Duration::from_secs(30))
        .with_inputs(Schema::new(vec![
            FieldSpec::new("repo_path", FieldType::String),
            FieldSpec::new("files", string_list()),
            FieldSpec::new("folders", string_list()),
            FieldSpec::new("deps", string_list()),
            FieldSpec::new("commits", string_list()),
        ]))
        .with_outputs(Schema::new(vec![
            FieldSpec::new("platform", FieldType::String).required(),
            FieldSpec::new("unknown", FieldType::Bool).required(),
        ]));
        Self { def }
    }

    fn snapshot_from_inputs(inputs: &Value) -> Result<RepoSnapshot> {
        if let Some(path) = inputs.get("repo_path").and_then(Value::as_str) {
            let root = Utf8PathBuf::from(path);
            let commits = string_list(inputs, "commits");
            return Ok(RepoSnapshot::from_dir(&root)?.with_commits(commits));
        }
        Ok(RepoSnapshot {
            files: string_list(inputs, "files"),
            folders: string_list(inputs, "folders"),
            deps: string_list(inputs, "deps"),
            commit_messages: string_list(inputs, "commits"),
            contents: Vec::new(),
        })
    }
}

fn string_list(inputs: &Value, key: &str) -> Vec<String> {
    inputs
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Default for DetectPlatformAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for DetectPlatformAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value> {
        let snapshot = Self::snapshot_from_inputs(&inputs)?;
        let set = ctx.signatures.current();
        let result = Detector::new().detect(&set, &snapshot);

        Ok(json!({
            "platform": result.platform_id(),
            "unknown": result.is_unknown(),
            "matches": result.matches,
            "hybrid_hint": result.hybrid_hint,
            "max_score": result.max_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::test_support::action_context;

    #[tokio::test]
    async fn test_detect_from_inline_evidence() {
        let (services, _handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = DetectPlatformAction::new();

        let out = action
            .run(
                &ctx,
                json!({
                    "files": [".replit", "package.json"],
                    "deps": ["@lovable/core"],
                    "commits": ["chore: lovable init"],
                }),
            )
            .await
            .unwrap();

        assert_eq!(out["platform"], "lovable");
        assert_eq!(out["unknown"], false);
        assert_eq!(out["hybrid_hint"], "prototype-to-ide_workflow");
    }

    #[tokio::test]
    async fn test_detect_unknown_reports_max_score() {
        let (services, _handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = DetectPlatformAction::new();

        let out = action.run(&ctx, json!({"files": ["main.c"]})).await.unwrap();
        assert_eq!(out["platform"], "unknown");
        assert_eq!(out["unknown"], true);
        assert_eq!(out["max_score"], 0.0);
    }
}
