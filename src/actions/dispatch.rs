//! `issues.dispatch` - deliver routed issues to their sinks.
//!
//! Effectful: every delivery carries the issue's idempotency key, and a
//! `Conflict` from a sink whose existing resource matches that key is
//! normalized to success (re-running a failed step never duplicates
//! tracker rows).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::adapters::NewTicket;
use crate::error::{AutoPrError, Result};
use crate::registry::{Action, ActionContext, ActionDef, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;
use crate::review::{Issue, Sink};

pub struct DispatchIssuesAction {
    def: ActionDef,
}

impl DispatchIssuesAction {
    pub fn new() -> Self {
        let def = ActionDef::new("issues.dispatch", "Deliver routed issues to their sinks")
            .idempotency(IdempotencyClass::Effectful)
            .with_timeout(Duration::from_secs(60))
            .with_scopes(&["tracker:write", "vcs:write", "chat:write"])
            // `issues` is the analyzer's serialized Issue list; its shape is
            // owned by the review schema, so it passes through unchecked here
            .with_inputs(Schema::new(vec![FieldSpec::new("channel", FieldType::String)
                .with_default(json!("#reviews"))]))
            .with_outputs(Schema::new(vec![
                FieldSpec::new("dispatched", FieldType::Int).required(),
                FieldSpec::new("conflicts", FieldType::Int).required(),
            ]));
        Self { def }
    }
}

impl Default for DispatchIssuesAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for DispatchIssuesAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value> {
        let issues: Vec<Issue> = inputs
            .get("issues")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        let channel = inputs
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("#reviews")
            .to_string();

        let mut refs: Vec<Value> = Vec::with_capacity(issues.len());
        let mut conflicts = 0u64;

        for issue in &issues {
            let delivered = match issue.sink {
                Sink::Tracker => self.deliver_tracker(ctx, issue).await,
                Sink::VcsIssue => self.deliver_vcs_issue(ctx, issue).await,
                Sink::Chat => self.deliver_chat(ctx, issue, &channel).await,
                Sink::Email => {
                    // No email gateway in the adapter set; recorded, not fatal
                    warn!(issue = %issue.correlates_to, "email sink not configured");
                    Ok(Delivery {
                        sink_ref: "unsupported".to_string(),
                        conflict: false,
                    })
                }
            };
            match delivered {
                Ok(delivery) => {
                    if delivery.conflict {
                        conflicts += 1;
                    }
                    refs.push(json!({
                        "sink": issue.sink.as_str(),
                        "sink_ref": delivery.sink_ref,
                        "finding": issue.correlates_to,
                        "conflict": delivery.conflict,
                    }));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(json!({
            "dispatched": refs.len(),
            "conflicts": conflicts,
            "deliveries": refs,
        }))
    }
}

struct Delivery {
    sink_ref: String,
    conflict: bool,
}

impl DispatchIssuesAction {
    async fn deliver_tracker(&self, ctx: &ActionContext, issue: &Issue) -> Result<Delivery> {
        let ticket = NewTicket {
            title: first_line(&issue.body_md),
            body_md: issue.body_md.clone(),
            labels: issue.labels.clone(),
            assignees: issue.assignees.clone(),
            priority: issue.priority,
            idempotency_key: issue.idempotency_key.clone(),
        };
        let tracker = ctx.adapters.tracker.clone();
        let deadline = ctx.deadline.clone();
        let result = ctx
            .call_gated("tracker", IdempotencyClass::Effectful, || {
                tracker.create_ticket(&ticket, &deadline)
            })
            .await;
        normalize_conflict(result.map(|r| r.id))
    }

    async fn deliver_vcs_issue(&self, ctx: &ActionContext, issue: &Issue) -> Result<Delivery> {
        let vcs = ctx.adapters.vcs.clone();
        let deadline = ctx.deadline.clone();
        let repo = ctx.work_item.source_repo.clone();
        let title = first_line(&issue.body_md);
        let result = ctx
            .call_gated("vcs", IdempotencyClass::Effectful, || {
                vcs.open_issue(
                    &repo,
                    &title,
                    &issue.body_md,
                    &issue.idempotency_key,
                    &deadline,
                )
            })
            .await;
        normalize_conflict(result)
    }

    async fn deliver_chat(
        &self,
        ctx: &ActionContext,
        issue: &Issue,
        channel: &str,
    ) -> Result<Delivery> {
        let chat = ctx.adapters.chat.clone();
        let deadline = ctx.deadline.clone();
        let result = ctx
            .call_gated("chat", IdempotencyClass::Effectful, || {
                chat.post_message(channel, &issue.body_md, &deadline)
            })
            .await;
        normalize_conflict(result)
    }
}

/// A Conflict whose resource matches the idempotency key means the sink
/// already holds this issue: success, recorded as a conflict.
fn normalize_conflict(result: Result<String>) -> Result<Delivery> {
    match result {
        Ok(sink_ref) => Ok(Delivery {
            sink_ref,
            conflict: false,
        }),
        Err(AutoPrError::Conflict { resource, .. }) => Ok(Delivery {
            sink_ref: resource,
            conflict: true,
        }),
        Err(other) => Err(other),
    }
}

fn first_line(body_md: &str) -> String {
    body_md
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("review finding")
        .trim_start_matches('#')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::review::REVIEW_SCHEMA_VERSION;
    use crate::test_support::action_context;

    fn issue(sink: Sink, key: &str) -> Issue {
        Issue {
            sink,
            sink_ref: None,
            assignees: vec![],
            labels: vec!["security".into()],
            priority: 1,
            body_md: "### hardcoded key\n\ndetails".into(),
            correlates_to: "f1".into(),
            idempotency_key: key.into(),
            schema_version: REVIEW_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn test_dispatch_creates_tracker_ticket() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = DispatchIssuesAction::new();

        let out = action
            .run(
                &ctx,
                json!({"issues": [issue(Sink::Tracker, "key-1")], "channel": "#ci"}),
            )
            .await
            .unwrap();

        assert_eq!(out["dispatched"], 1);
        assert_eq!(out["conflicts"], 0);
        assert_eq!(handles.tracker.ticket_count(), 1);
    }

    #[tokio::test]
    async fn test_replayed_dispatch_normalizes_conflict_to_ok() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = DispatchIssuesAction::new();
        let inputs = json!({"issues": [issue(Sink::Tracker, "key-1")]});

        let first = action.run(&ctx, inputs.clone()).await.unwrap();
        let second = action.run(&ctx, inputs).await.unwrap();

        assert_eq!(first["conflicts"], 0);
        assert_eq!(second["conflicts"], 1);
        // No duplicate row
        assert_eq!(handles.tracker.ticket_count(), 1);
        // The conflict delivery carries the existing ticket id
        assert_eq!(
            second["deliveries"][0]["sink_ref"],
            first["deliveries"][0]["sink_ref"]
        );
    }

    #[tokio::test]
    async fn test_chat_sink_posts_message() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = DispatchIssuesAction::new();

        action
            .run(
                &ctx,
                json!({"issues": [issue(Sink::Chat, "key-2")], "channel": "#sec"}),
            )
            .await
            .unwrap();

        assert_eq!(handles.chat.message_count(), 1);
        assert_eq!(handles.chat.messages.read()[0].0, "#sec");
    }
}
