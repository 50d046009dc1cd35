//! Webhook chat adapter.
//!
//! Posts JSON messages to a generic incoming-webhook URL (Slack-compatible
//! shape). The one real adapter shipped in-tree; everything else is reached
//! through deployment-specific gateways.
//!
//! Outbound payloads are optionally signed with the same hex HMAC-SHA256
//! scheme the ingress verifies, under `X-Signature`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{AutoPrError, Result};
use crate::ingress::signature::sign_hex;
use crate::util::Deadline;

use super::{ChatAdapter, RawCompletion};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat adapter delivering to an incoming-webhook URL.
pub struct WebhookChat {
    client: reqwest::Client,
    url: String,
    signing_secret: Option<String>,
}

impl WebhookChat {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("autopr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AutoPrError::Config {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            signing_secret: None,
        })
    }

    /// Sign outgoing payloads with this shared secret.
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    async fn post(&self, body: serde_json::Value, deadline: &Deadline) -> Result<String> {
        deadline.check("chat")?;
        let payload = serde_json::to_vec(&body)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .timeout(deadline.remaining())
            .body(payload.clone());

        if let Some(ref secret) = self.signing_secret {
            request = request.header("X-Signature", sign_hex(secret.as_bytes(), &payload));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AutoPrError::DeadlineExceeded {
                    operation: "chat".to_string(),
                }
            } else {
                AutoPrError::Transport {
                    endpoint: "chat".to_string(),
                    details: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => Ok(response.text().await.unwrap_or_default()),
            401 => Err(AutoPrError::AuthFailed {
                service: "chat".to_string(),
            }),
            403 => Err(AutoPrError::Forbidden {
                service: "chat".to_string(),
                operation: "post".to_string(),
            }),
            429 => Err(AutoPrError::RateLimited {
                service: "chat".to_string(),
                reason: "webhook rate limit".to_string(),
            }),
            code => Err(AutoPrError::Transport {
                endpoint: "chat".to_string(),
                details: format!("status {}", code),
            }),
        }
    }
}

#[async_trait]
impl ChatAdapter for WebhookChat {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        let body = json!({ "channel": channel, "text": text });
        self.post(body, deadline).await
    }

    async fn post_thread(
        &self,
        channel: &str,
        thread_ref: &str,
        text: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        let body = json!({ "channel": channel, "thread_ts": thread_ref, "text": text });
        self.post(body, deadline).await.map(|_| ())
    }
}

/// Shared text shaping for chat notifications about merge blocks.
pub fn merge_block_message(repo: &str, pr_number: u64, reasons: &[String]) -> String {
    format!(
        ":no_entry: Merge blocked for {}#{}\n{}",
        repo,
        pr_number,
        reasons
            .iter()
            .map(|r| format!("• {}", r))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Shared text shaping for LLM summary notifications.
pub fn summary_message(repo: &str, pr_number: u64, completion: &RawCompletion) -> String {
    format!("Summary for {}#{}:\n{}", repo, pr_number, completion.text)
}
