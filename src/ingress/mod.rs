//! Event Ingress & Dedup
//!
//! Receives review events from source-control hosts (webhook POSTs), the
//! CLI, or timers; authenticates them; collapses replays inside the dedup
//! window; and enqueues canonical [`WorkItem`]s for the worker pool.
//!
//! The handler is HTTP-shaped but server-agnostic: it returns a
//! [`HookResponse`] (status + JSON body) that any HTTP front end can relay
//! verbatim. Guarantees at-most-one enqueue per dedup key per window, not
//! globally exactly-once.

pub mod dedup;
pub mod event;
pub mod queue;
pub mod signature;

pub use dedup::DedupWindow;
pub use event::{WorkItem, WorkItemKind};
pub use queue::{RunQueue, RunQueueReceiver};
pub use signature::verify_signature;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AutoPrConfig;
use crate::error::{AutoPrError, Result};

/// HTTP-shaped ingress response.
#[derive(Debug, Clone, PartialEq)]
pub struct HookResponse {
    pub status: u16,
    pub body: Value,
    /// Set on backpressure (503) so the front end can emit `Retry-After`.
    pub retry_after_secs: Option<u64>,
}

impl HookResponse {
    fn accepted(run_id: &str, dedup: &str) -> Self {
        Self {
            status: 202,
            body: json!({ "run_id": run_id, "dedup": dedup }),
            retry_after_secs: None,
        }
    }

    fn from_error(err: &AutoPrError) -> Self {
        let retry_after_secs = match err {
            AutoPrError::QueueFull {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            status: err.kind().http_status(),
            body: json!({
                "error": err.to_string(),
                "kind": err.kind(),
                "code": err.code(),
            }),
            retry_after_secs,
        }
    }
}

/// Ingress front door: signature check, WorkItem synthesis, dedup, enqueue.
pub struct IngressHandler {
    config: AutoPrConfig,
    dedup: DedupWindow,
    queue: RunQueue,
}

impl IngressHandler {
    pub fn new(config: AutoPrConfig, queue: RunQueue) -> Self {
        let window = std::time::Duration::from_secs(config.ingress.dedup_window_secs);
        Self {
            config,
            dedup: DedupWindow::new(window),
            queue,
        }
    }

    /// Access the dedup window (shared with tests and the worker pool).
    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    /// Handle `POST /hooks/{source}`.
    ///
    /// Headers of interest: `X-Signature` (hex HMAC-SHA256 of the body) and
    /// `X-Event-Kind`. Returns 202 with `{"run_id","dedup"}` on success.
    pub fn handle_hook(
        &self,
        source: &str,
        signature_hex: Option<&str>,
        event_kind: Option<&str>,
        body: &[u8],
    ) -> HookResponse {
        match self.accept(source, signature_hex, event_kind, body) {
            Ok((run_id, dedup)) => HookResponse::accepted(&run_id, dedup),
            Err(err) => {
                warn!(source, code = err.code(), "rejected hook: {}", err);
                HookResponse::from_error(&err)
            }
        }
    }

    /// Enqueue a manually triggered run (CLI or timer). Bypasses signature
    /// checks but still dedups and respects backpressure.
    pub fn submit_manual(&self, item: WorkItem) -> Result<(String, &'static str)> {
        self.dedup_and_enqueue(item)
    }

    fn accept(
        &self,
        source: &str,
        signature_hex: Option<&str>,
        event_kind: Option<&str>,
        body: &[u8],
    ) -> Result<(String, &'static str)> {
        let secret = self
            .config
            .source_secret(source)
            .ok_or_else(|| AutoPrError::UnknownSource {
                event_source: source.to_string(),
            })?;

        let signature = signature_hex.ok_or_else(|| AutoPrError::InvalidSignature {
            event_source: source.to_string(),
        })?;
        verify_signature(secret.as_bytes(), body, signature).map_err(|_| {
            AutoPrError::InvalidSignature {
                event_source: source.to_string(),
            }
        })?;

        let kind = event_kind
            .and_then(WorkItemKind::parse)
            .ok_or_else(|| AutoPrError::MalformedPayload {
                event_source: source.to_string(),
                details: format!(
                    "unknown event kind '{}'",
                    event_kind.unwrap_or("<missing>")
                ),
            })?;

        let payload: Value =
            serde_json::from_slice(body).map_err(|e| AutoPrError::MalformedPayload {
                event_source: source.to_string(),
                details: e.to_string(),
            })?;

        let item = WorkItem::from_payload(source, kind, payload)?;
        self.dedup_and_enqueue(item)
    }

    fn dedup_and_enqueue(&self, item: WorkItem) -> Result<(String, &'static str)> {
        if let Some(existing_run) = self.dedup.check(&item.dedup_key) {
            debug!(dedup_key = %item.dedup_key, "coalesced replayed event");
            return Ok((existing_run, "coalesced"));
        }

        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        let dedup_key = item.dedup_key.clone();
        self.queue.try_enqueue(item, &self.config.ingress)?;
        self.dedup.record(dedup_key, run_id.clone());
        Ok((run_id, "new"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::ingress::signature::sign_hex;

    fn test_config() -> AutoPrConfig {
        let mut config = AutoPrConfig::default();
        config.sources.insert(
            "github".to_string(),
            SourceConfig {
                secret: "whsec_test".to_string(),
            },
        );
        config
    }

    fn handler() -> (IngressHandler, RunQueueReceiver) {
        let config = test_config();
        let (queue, rx) = RunQueue::bounded(config.ingress.queue_capacity);
        (IngressHandler::new(config, queue), rx)
    }

    fn pr_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "repo": "octo/widgets",
            "pr_number": 42,
            "actor": "octocat",
            "payload_version": 1,
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_hook_accepted() {
        let (handler, mut rx) = handler();
        let body = pr_body();
        let sig = sign_hex(b"whsec_test", &body);

        let resp = handler.handle_hook("github", Some(&sig), Some("pr_opened"), &body);
        assert_eq!(resp.status, 202);
        assert_eq!(resp.body["dedup"], "new");
        assert!(resp.body["run_id"].as_str().unwrap().starts_with("run-"));
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_bad_signature_rejected_401() {
        let (handler, mut rx) = handler();
        let body = pr_body();

        let resp = handler.handle_hook("github", Some("deadbeef"), Some("pr_opened"), &body);
        assert_eq!(resp.status, 401);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_missing_signature_rejected_401() {
        let (handler, _rx) = handler();
        let resp = handler.handle_hook("github", None, Some("pr_opened"), &pr_body());
        assert_eq!(resp.status, 401);
    }

    #[test]
    fn test_unknown_source_rejected() {
        let (handler, _rx) = handler();
        let body = pr_body();
        let sig = sign_hex(b"whsec_test", &body);
        let resp = handler.handle_hook("gitlab", Some(&sig), Some("pr_opened"), &body);
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn test_malformed_payload_rejected_400() {
        let (handler, _rx) = handler();
        let body = b"not json".to_vec();
        let sig = sign_hex(b"whsec_test", &body);
        let resp = handler.handle_hook("github", Some(&sig), Some("pr_opened"), &body);
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn test_replay_within_window_coalesces() {
        let (handler, mut rx) = handler();
        let body = pr_body();
        let sig = sign_hex(b"whsec_test", &body);

        let first = handler.handle_hook("github", Some(&sig), Some("pr_opened"), &body);
        let second = handler.handle_hook("github", Some(&sig), Some("pr_opened"), &body);

        assert_eq!(first.body["dedup"], "new");
        assert_eq!(second.status, 202);
        assert_eq!(second.body["dedup"], "coalesced");
        assert_eq!(second.body["run_id"], first.body["run_id"]);

        // Exactly one enqueue
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_queue_full_returns_503_with_retry_after() {
        let mut config = test_config();
        config.ingress.queue_capacity = 1;
        let (queue, _rx) = RunQueue::bounded(1);
        let handler = IngressHandler::new(config, queue);

        let first = pr_body();
        let sig1 = sign_hex(b"whsec_test", &first);
        assert_eq!(
            handler
                .handle_hook("github", Some(&sig1), Some("pr_opened"), &first)
                .status,
            202
        );

        // Different PR so dedup does not coalesce it first
        let second = serde_json::to_vec(&serde_json::json!({
            "repo": "octo/widgets",
            "pr_number": 43,
            "actor": "octocat",
        }))
        .unwrap();
        let sig2 = sign_hex(b"whsec_test", &second);
        let resp = handler.handle_hook("github", Some(&sig2), Some("pr_opened"), &second);
        assert_eq!(resp.status, 503);
        assert!(resp.retry_after_secs.is_some());
    }
}
