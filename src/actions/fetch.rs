//! `vcs.fetch_pr` - fetch a pull request and its changed files.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::registry::{Action, ActionContext, ActionDef, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;

pub struct FetchPrAction {
    def: ActionDef,
}

impl FetchPrAction {
    pub fn new() -> Self {
        let def = ActionDef::new("vcs.fetch_pr", "Fetch a PR and its changed files")
            .idempotency(IdempotencyClass::Read)
            .cacheable()
            .with_timeout(Duration::from_secs(30))
            .with_scopes(&["vcs:read"])
            .with_inputs(Schema::new(vec![
                FieldSpec::new("repo", FieldType::String),
                FieldSpec::new("pr_number", FieldType::Int),
            ]))
            .with_outputs(Schema::new(vec![
                FieldSpec::new("repo", FieldType::String).required(),
                FieldSpec::new("pr_number", FieldType::Int).required(),
                FieldSpec::new(
                    "files",
                    FieldType::List {
                        item: Box::new(FieldType::String),
                    },
                )
                .required(),
            ]));
        Self { def }
    }
}

impl Default for FetchPrAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for FetchPrAction {
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

        let vcs = ctx.adapters.vcs.clone();
        let deadline = ctx.deadline.clone();
        let pr = ctx
            .call_gated("vcs", IdempotencyClass::Read, || {
                vcs.fetch_pr(&repo, pr_number, &deadline)
            })
            .await?;

        let vcs = ctx.adapters.vcs.clone();
        let deadline = ctx.deadline.clone();
        let files = ctx
            .call_gated("vcs", IdempotencyClass::Read, || {
                vcs.list_files(&repo, pr_number, &deadline)
            })
            .await?;

        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let file_count = paths.len();
        let additions: u32 = files.iter().map(|f| f.additions).sum();
        let deletions: u32 = files.iter().map(|f| f.deletions).sum();

        Ok(json!({
            "repo": repo,
            "pr_number": pr_number,
            "pr": pr,
            "files": paths,
            "file_count": file_count,
            "additions": additions,
            "deletions": deletions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PrFile, PullRequest};
    use crate::engine::Services;
    use crate::test_support::action_context;

    #[tokio::test]
    async fn test_fetch_uses_work_item_defaults() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        handles.vcs.set_pr(PullRequest {
            repo: "octo/widgets".into(),
            number: 42,
            title: "Fix parser".into(),
            author: "octocat".into(),
            body: String::new(),
            head_sha: "abc123".into(),
        });
        handles.vcs.set_files(vec![
            PrFile {
                path: "src/parser.ts".into(),
                additions: 10,
                deletions: 2,
                patch: None,
            },
            PrFile {
                path: "src/parser.test.ts".into(),
                additions: 30,
                deletions: 0,
                patch: None,
            },
        ]);

        let ctx = action_context(&services, "octo/widgets", 42);
        let action = FetchPrAction::new();
        let out = action.run(&ctx, json!({})).await.unwrap();

        assert_eq!(out["repo"], "octo/widgets");
        assert_eq!(out["file_count"], 2);
        assert_eq!(out["additions"], 40);
        assert_eq!(out["files"][0], "src/parser.ts");
    }
}
