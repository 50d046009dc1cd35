//! WorkItem - the canonical unit of ingress work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AutoPrError, Result};
use crate::util::canon::{canonical_json, hex_sha256};

/// Closed set of event kinds the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    PrOpened,
    PrUpdated,
    PrComment,
    ReviewSubmitted,
    Manual,
}

impl WorkItemKind {
    /// Parse the `X-Event-Kind` header value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pr_opened" => Some(Self::PrOpened),
            "pr_updated" => Some(Self::PrUpdated),
            "pr_comment" => Some(Self::PrComment),
            "review_submitted" => Some(Self::ReviewSubmitted),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrOpened => "pr_opened",
            Self::PrUpdated => "pr_updated",
            Self::PrComment => "pr_comment",
            Self::ReviewSubmitted => "review_submitted",
            Self::Manual => "manual",
        }
    }
}

/// A single unit of work synthesized from an ingress event.
///
/// Two WorkItems with the same `dedup_key` inside the dedup window collapse
/// to one enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique, stable hash of the event
    pub id: String,
    pub kind: WorkItemKind,
    pub source_repo: String,
    pub pr_number: u64,
    pub actor: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    /// `sha256(source|kind|repo|pr|payload_version)`
    pub dedup_key: String,
}

impl WorkItem {
    /// Synthesize a WorkItem from a verified webhook payload.
    ///
    /// Required payload fields: `repo` (string), `pr_number` (u64).
    /// Optional: `actor`, `payload_version` (default 1).
    pub fn from_payload(source: &str, kind: WorkItemKind, payload: Value) -> Result<Self> {
        let repo = payload
            .get("repo")
            .and_then(Value::as_str)
            .ok_or_else(|| AutoPrError::MalformedPayload {
                event_source: source.to_string(),
                details: "missing 'repo' field".to_string(),
            })?
            .to_string();
        let pr_number = payload
            .get("pr_number")
            .and_then(Value::as_u64)
            .ok_or_else(|| AutoPrError::MalformedPayload {
                event_source: source.to_string(),
                details: "missing 'pr_number' field".to_string(),
            })?;
        let actor = payload
            .get("actor")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let payload_version = payload
            .get("payload_version")
            .and_then(Value::as_u64)
            .unwrap_or(1);

        let dedup_key = Self::dedup_key(source, kind, &repo, pr_number, payload_version);
        let id = hex_sha256(
            format!("{}\0{}", dedup_key, canonical_json(&payload)).as_bytes(),
        );

        Ok(Self {
            id,
            kind,
            source_repo: repo,
            pr_number,
            actor,
            payload,
            received_at: Utc::now(),
            dedup_key,
        })
    }

    /// Build a manual WorkItem (CLI `run` or timer trigger).
    pub fn manual(repo: &str, pr_number: u64, inputs: Value) -> Self {
        let dedup_key = Self::dedup_key("cli", WorkItemKind::Manual, repo, pr_number, 1);
        // Manual submissions are never coalesced with each other: salt the
        // id and key with a fresh uuid.
        let salt = uuid::Uuid::new_v4().to_string();
        let id = hex_sha256(format!("{}\0{}", dedup_key, salt).as_bytes());
        Self {
            id: id.clone(),
            kind: WorkItemKind::Manual,
            source_repo: repo.to_string(),
            pr_number,
            actor: "cli".to_string(),
            payload: inputs,
            received_at: Utc::now(),
            dedup_key: id,
        }
    }

    fn dedup_key(
        source: &str,
        kind: WorkItemKind,
        repo: &str,
        pr_number: u64,
        payload_version: u64,
    ) -> String {
        hex_sha256(
            format!(
                "{}|{}|{}|{}|{}",
                source,
                kind.as_str(),
                repo,
                pr_number,
                payload_version
            )
            .as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in [
            WorkItemKind::PrOpened,
            WorkItemKind::PrUpdated,
            WorkItemKind::PrComment,
            WorkItemKind::ReviewSubmitted,
            WorkItemKind::Manual,
        ] {
            assert_eq!(WorkItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(WorkItemKind::parse("push"), None);
    }

    #[test]
    fn test_from_payload_extracts_fields() {
        let payload = json!({"repo": "octo/widgets", "pr_number": 42, "actor": "octocat"});
        let item = WorkItem::from_payload("github", WorkItemKind::PrOpened, payload).unwrap();
        assert_eq!(item.source_repo, "octo/widgets");
        assert_eq!(item.pr_number, 42);
        assert_eq!(item.actor, "octocat");
        assert_eq!(item.dedup_key.len(), 64);
    }

    #[test]
    fn test_missing_repo_is_malformed() {
        let payload = json!({"pr_number": 42});
        let err =
            WorkItem::from_payload("github", WorkItemKind::PrOpened, payload).unwrap_err();
        assert_eq!(err.code(), "APR-002");
    }

    #[test]
    fn test_dedup_key_stable_across_payload_noise() {
        // Same source/kind/repo/pr/version: same dedup key even if payload
        // bodies differ (e.g. delivery timestamps).
        let a = WorkItem::from_payload(
            "github",
            WorkItemKind::PrOpened,
            json!({"repo": "o/r", "pr_number": 1, "delivery": "aaa"}),
        )
        .unwrap();
        let b = WorkItem::from_payload(
            "github",
            WorkItemKind::PrOpened,
            json!({"repo": "o/r", "pr_number": 1, "delivery": "bbb"}),
        )
        .unwrap();
        assert_eq!(a.dedup_key, b.dedup_key);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_dedup_key_differs_by_kind() {
        let a = WorkItem::from_payload(
            "github",
            WorkItemKind::PrOpened,
            json!({"repo": "o/r", "pr_number": 1}),
        )
        .unwrap();
        let b = WorkItem::from_payload(
            "github",
            WorkItemKind::PrUpdated,
            json!({"repo": "o/r", "pr_number": 1}),
        )
        .unwrap();
        assert_ne!(a.dedup_key, b.dedup_key);
    }

    #[test]
    fn test_manual_items_never_coalesce() {
        let a = WorkItem::manual("o/r", 1, json!({}));
        let b = WorkItem::manual("o/r", 1, json!({}));
        assert_ne!(a.dedup_key, b.dedup_key);
    }
}
