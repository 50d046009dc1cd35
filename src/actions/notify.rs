//! `chat.post` - post a message to the chat sink.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::registry::{Action, ActionContext, ActionDef, FieldSpec, FieldType, Schema};
use crate::resilience::IdempotencyClass;

pub struct NotifyChatAction {
    def: ActionDef,
}

impl NotifyChatAction {
    pub fn new() -> Self {
        let def = ActionDef::new("chat.post", "Post a message to a chat channel")
            .idempotency(IdempotencyClass::Effectful)
            .with_timeout(Duration::from_secs(15))
            .with_scopes(&["chat:write"])
            .with_inputs(Schema::new(vec![
                FieldSpec::new("channel", FieldType::String).with_default(json!("#reviews")),
                FieldSpec::new("text", FieldType::String).required(),
            ]))
            .with_outputs(Schema::new(vec![FieldSpec::new(
                "message_ref",
                FieldType::String,
            )
            .required()]));
        Self { def }
    }
}

impl Default for NotifyChatAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for NotifyChatAction {
    fn def(&self) -> &ActionDef {
        &self.def
    }

    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value> {
        let channel = inputs
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("#reviews")
            .to_string();
        let text = inputs
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let chat = ctx.adapters.chat.clone();
        let deadline = ctx.deadline.clone();
        let message_ref = ctx
            .call_gated("chat", IdempotencyClass::Effectful, || {
                chat.post_message(&channel, &text, &deadline)
            })
            .await?;

        Ok(json!({ "message_ref": message_ref, "channel": channel }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Services;
    use crate::test_support::action_context;

    #[tokio::test]
    async fn test_post_message() {
        let (services, handles) =
            Services::in_memory(crate::config::AutoPrConfig::default()).unwrap();
        let ctx = action_context(&services, "octo/widgets", 42);
        let action = NotifyChatAction::new();

        let out = action
            .run(&ctx, json!({"text": "merge blocked", "channel": "#ci"}))
            .await
            .unwrap();

        assert!(out["message_ref"].as_str().unwrap().starts_with("msg-"));
        assert_eq!(handles.chat.message_count(), 1);
    }
}
