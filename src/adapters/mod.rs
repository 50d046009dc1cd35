//! External Adapter Set
//!
//! Small, uniform async interfaces to the external collaborators: VCS host,
//! issue tracker, chat, clock, secrets, reviewer streams, and the LLM
//! gateway. Every call takes a [`Deadline`], returns structured errors from
//! the closed taxonomy, and has an in-memory double in [`memory`].
//!
//! The orchestrator never talks to the outside world except through these
//! traits; the [`webhook`] chat adapter is the one real implementation
//! shipped in-tree.

pub mod memory;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::review::ReviewerStream;
use crate::util::Deadline;

/// A pull request as fetched from the VCS host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub body: String,
    pub head_sha: String,
}

/// One changed file within a PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFile {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    #[serde(default)]
    pub patch: Option<String>,
}

/// A ticket to be created in the external tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicket {
    pub title: String,
    pub body_md: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    /// 1 (urgent) .. 4 (low)
    pub priority: u8,
    /// Duplicate-suppression key; creating twice with the same key yields
    /// `Conflict` carrying the existing ticket id
    pub idempotency_key: String,
}

/// Reference to a created tracker ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: String,
}

/// Raw LLM completion as returned by the gateway (costing happens in-tree).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCompletion {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
}

#[async_trait]
pub trait VcsAdapter: Send + Sync {
    async fn fetch_pr(&self, repo: &str, number: u64, deadline: &Deadline)
        -> Result<PullRequest>;
    async fn list_files(
        &self,
        repo: &str,
        number: u64,
        deadline: &Deadline,
    ) -> Result<Vec<PrFile>>;
    async fn add_comment(
        &self,
        repo: &str,
        number: u64,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()>;
    async fn open_issue(
        &self,
        repo: &str,
        title: &str,
        body_md: &str,
        idempotency_key: &str,
        deadline: &Deadline,
    ) -> Result<String>;
}

#[async_trait]
pub trait TrackerAdapter: Send + Sync {
    async fn create_ticket(&self, ticket: &NewTicket, deadline: &Deadline) -> Result<TicketRef>;
    async fn update_ticket(
        &self,
        ticket_id: &str,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()>;
    async fn add_comment(
        &self,
        ticket_id: &str,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()>;
}

#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str, deadline: &Deadline)
        -> Result<String>;
    async fn post_thread(
        &self,
        channel: &str,
        thread_ref: &str,
        text: &str,
        deadline: &Deadline,
    ) -> Result<()>;
}

/// Upstream reviewer streams for a PR.
#[async_trait]
pub trait ReviewSourceAdapter: Send + Sync {
    async fn fetch_streams(
        &self,
        repo: &str,
        number: u64,
        deadline: &Deadline,
    ) -> Result<Vec<ReviewerStream>>;
}

/// LLM gateway: the orchestrator routes and budgets, the adapter completes.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(
        &self,
        model_id: &str,
        prompt: &str,
        deadline: &Deadline,
    ) -> Result<RawCompletion>;
}

/// Wall-clock source, mockable for budget-window tests.
pub trait ClockAdapter: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Credential lookup; resolution order is deployment-specific.
pub trait SecretsAdapter: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// System clock.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockAdapter for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Secrets from process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

impl SecretsAdapter for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// The full adapter set handed to actions through the run context.
#[derive(Clone)]
pub struct AdapterSet {
    pub vcs: Arc<dyn VcsAdapter>,
    pub tracker: Arc<dyn TrackerAdapter>,
    pub chat: Arc<dyn ChatAdapter>,
    pub reviews: Arc<dyn ReviewSourceAdapter>,
    pub llm: Arc<dyn LlmAdapter>,
    pub clock: Arc<dyn ClockAdapter>,
    pub secrets: Arc<dyn SecretsAdapter>,
}

impl AdapterSet {
    /// A fully in-memory set for tests and dry runs.
    pub fn in_memory() -> (Self, memory::MemoryHandles) {
        memory::memory_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_env_secrets_empty_is_none() {
        let secrets = EnvSecrets;
        assert!(secrets.get("AUTOPR_TEST_UNSET_VAR_XYZ").is_none());
    }

    #[test]
    fn test_adapter_set_is_cloneable() {
        let (set, _handles) = AdapterSet::in_memory();
        let _clone = set.clone();
    }
}
