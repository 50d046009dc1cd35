//! In-memory adapter doubles.
//!
//! These are part of the public API: integration tests and dry runs wire
//! the engine against them. Each double records the calls it received and
//! supports scripted failures and latency so resilience and deadline
//! behavior can be exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use crate::error::{AutoPrError, Result};
use crate::review::ReviewerStream;
use crate::util::Deadline;

use super::{
    AdapterSet, ChatAdapter, ClockAdapter, LlmAdapter, NewTicket, PrFile, PullRequest,
    RawCompletion, ReviewSourceAdapter, SecretsAdapter, TicketRef, TrackerAdapter, VcsAdapter,
};

/// Scripted fault/latency shared by all doubles.
#[derive(Default)]
struct FaultPlan {
    /// Remaining calls that fail with a transport error
    fail_times: AtomicU32,
    /// Artificial latency per call
    delay: RwLock<Duration>,
}

impl FaultPlan {
    async fn apply(&self, endpoint: &str, deadline: &Deadline) -> Result<()> {
        deadline.check(endpoint)?;
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_times.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_times
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(AutoPrError::Transport {
                endpoint: endpoint.to_string(),
                details: "injected 503".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory VCS host.
#[derive(Default)]
pub struct MemoryVcs {
    faults: FaultPlan,
    pr: RwLock<Option<PullRequest>>,
    files: RwLock<Vec<PrFile>>,
    pub comments: RwLock<Vec<(String, u64, String)>>,
    pub issues: RwLock<Vec<(String, String, String)>>,
}

impl MemoryVcs {
    pub fn set_pr(&self, pr: PullRequest) {
        *self.pr.write() = Some(pr);
    }

    pub fn set_files(&self, files: Vec<PrFile>) {
        *self.files.write() = files;
    }

    pub fn fail_next(&self, times: u32) {
        self.faults.fail_times.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.faults.delay.write() = delay;
    }
}

#[async_trait]
impl VcsAdapter for MemoryVcs {
    async fn fetch_pr(
        &self,
        repo: &str,
        number: u64,
        deadline: &Deadline,
    ) -> Result<PullRequest> {
        self.faults.apply("vcs", deadline).await?;
        self.pr
            .read()
            .clone()
            .filter(|pr| pr.repo == repo && pr.number == number)
            .ok_or_else(|| AutoPrError::Transport {
                endpoint: "vcs".to_string(),
                details: format!("pr {}#{} not seeded", repo, number),
            })
    }

    async fn list_files(
        &self,
        _repo: &str,
        _number: u64,
        deadline: &Deadline,
    ) -> Result<Vec<PrFile>> {
        self.faults.apply("vcs", deadline).await?;
        Ok(self.files.read().clone())
    }

    async fn add_comment(
        &self,
        repo: &str,
        number: u64,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.faults.apply("vcs", deadline).await?;
        self.comments
            .write()
            .push((repo.to_string(), number, body_md.to_string()));
        Ok(())
    }

    async fn open_issue(
        &self,
        repo: &str,
        title: &str,
        body_md: &str,
        idempotency_key: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        self.faults.apply("vcs", deadline).await?;
        let mut issues = self.issues.write();
        if issues.iter().any(|(_, _, key)| key == idempotency_key) {
            return Err(AutoPrError::Conflict {
                resource: format!("{}#issue", repo),
                details: format!("idempotency key {} already used", idempotency_key),
            });
        }
        issues.push((
            title.to_string(),
            body_md.to_string(),
            idempotency_key.to_string(),
        ));
        Ok(format!("issue-{}", issues.len()))
    }
}

/// In-memory tracker with Conflict-by-idempotency-key semantics.
#[derive(Default)]
pub struct MemoryTracker {
    faults: FaultPlan,
    /// idempotency_key → ticket
    tickets: RwLock<HashMap<String, (TicketRef, NewTicket)>>,
    pub comments: RwLock<Vec<(String, String)>>,
}

impl MemoryTracker {
    pub fn fail_next(&self, times: u32) {
        self.faults.fail_times.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.faults.delay.write() = delay;
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.read().len()
    }

    pub fn ticket_by_key(&self, idempotency_key: &str) -> Option<TicketRef> {
        self.tickets
            .read()
            .get(idempotency_key)
            .map(|(r, _)| r.clone())
    }
}

#[async_trait]
impl TrackerAdapter for MemoryTracker {
    async fn create_ticket(&self, ticket: &NewTicket, deadline: &Deadline) -> Result<TicketRef> {
        self.faults.apply("tracker", deadline).await?;
        let mut tickets = self.tickets.write();
        if let Some((existing, _)) = tickets.get(&ticket.idempotency_key) {
            return Err(AutoPrError::Conflict {
                resource: existing.id.clone(),
                details: format!("idempotency key {} already used", ticket.idempotency_key),
            });
        }
        let ticket_ref = TicketRef {
            id: format!("TICKET-{}", tickets.len() + 1),
        };
        tickets.insert(
            ticket.idempotency_key.clone(),
            (ticket_ref.clone(), ticket.clone()),
        );
        Ok(ticket_ref)
    }

    async fn update_ticket(
        &self,
        ticket_id: &str,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.faults.apply("tracker", deadline).await?;
        let mut tickets = self.tickets.write();
        for (_, (ticket_ref, ticket)) in tickets.iter_mut() {
            if ticket_ref.id == ticket_id {
                ticket.body_md = body_md.to_string();
                return Ok(());
            }
        }
        Err(AutoPrError::Transport {
            endpoint: "tracker".to_string(),
            details: format!("ticket {} not found", ticket_id),
        })
    }

    async fn add_comment(
        &self,
        ticket_id: &str,
        body_md: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.faults.apply("tracker", deadline).await?;
        self.comments
            .write()
            .push((ticket_id.to_string(), body_md.to_string()));
        Ok(())
    }
}

/// In-memory chat sink.
#[derive(Default)]
pub struct MemoryChat {
    faults: FaultPlan,
    pub messages: RwLock<Vec<(String, String)>>,
}

impl MemoryChat {
    pub fn fail_next(&self, times: u32) {
        self.faults.fail_times.store(times, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }
}

#[async_trait]
impl ChatAdapter for MemoryChat {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        self.faults.apply("chat", deadline).await?;
        let mut messages = self.messages.write();
        messages.push((channel.to_string(), text.to_string()));
        Ok(format!("msg-{}", messages.len()))
    }

    async fn post_thread(
        &self,
        channel: &str,
        thread_ref: &str,
        text: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        self.faults.apply("chat", deadline).await?;
        self.messages
            .write()
            .push((channel.to_string(), format!("[{}] {}", thread_ref, text)));
        Ok(())
    }
}

/// In-memory reviewer streams.
#[derive(Default)]
pub struct MemoryReviews {
    faults: FaultPlan,
    streams: RwLock<Vec<ReviewerStream>>,
}

impl MemoryReviews {
    pub fn set_streams(&self, streams: Vec<ReviewerStream>) {
        *self.streams.write() = streams;
    }
}

#[async_trait]
impl ReviewSourceAdapter for MemoryReviews {
    async fn fetch_streams(
        &self,
        _repo: &str,
        _number: u64,
        deadline: &Deadline,
    ) -> Result<Vec<ReviewerStream>> {
        self.faults.apply("reviews", deadline).await?;
        Ok(self.streams.read().clone())
    }
}

/// In-memory LLM gateway: echoes a canned response per prompt prefix.
#[derive(Default)]
pub struct MemoryLlm {
    faults: FaultPlan,
    responses: RwLock<Vec<(String, String)>>,
    pub calls: RwLock<Vec<(String, String)>>,
}

impl MemoryLlm {
    /// Respond with `text` for any prompt containing `needle`.
    pub fn respond_with(&self, needle: &str, text: &str) {
        self.responses
            .write()
            .push((needle.to_string(), text.to_string()));
    }

    pub fn fail_next(&self, times: u32) {
        self.faults.fail_times.store(times, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.faults.delay.write() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }
}

#[async_trait]
impl LlmAdapter for MemoryLlm {
    async fn complete(
        &self,
        model_id: &str,
        prompt: &str,
        deadline: &Deadline,
    ) -> Result<RawCompletion> {
        self.faults.apply("llm", deadline).await?;
        self.calls
            .write()
            .push((model_id.to_string(), prompt.to_string()));

        let text = self
            .responses
            .read()
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, text)| text.clone())
            .unwrap_or_else(|| format!("Reviewed. The change in question looks correct; {}", prompt.len()));

        Ok(RawCompletion {
            tokens_in: (prompt.len() / 4) as u32,
            tokens_out: (text.len() / 4) as u32,
            latency_ms: 5,
            text,
        })
    }
}

/// Settable clock for budget-window tests.
pub struct MemoryClock {
    now: RwLock<DateTime<Utc>>,
}

impl Default for MemoryClock {
    fn default() -> Self {
        Self {
            now: RwLock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
        }
    }
}

impl MemoryClock {
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.write();
        *now += delta;
    }
}

impl ClockAdapter for MemoryClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Secrets from a plain map.
#[derive(Default)]
pub struct MemorySecrets {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
    }
}

impl SecretsAdapter for MemorySecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

/// Concrete handles to the doubles inside an in-memory [`AdapterSet`].
#[derive(Clone)]
pub struct MemoryHandles {
    pub vcs: Arc<MemoryVcs>,
    pub tracker: Arc<MemoryTracker>,
    pub chat: Arc<MemoryChat>,
    pub reviews: Arc<MemoryReviews>,
    pub llm: Arc<MemoryLlm>,
    pub clock: Arc<MemoryClock>,
    pub secrets: Arc<MemorySecrets>,
}

/// Build a fully in-memory adapter set plus handles for test scripting.
pub fn memory_set() -> (AdapterSet, MemoryHandles) {
    let vcs = Arc::new(MemoryVcs::default());
    let tracker = Arc::new(MemoryTracker::default());
    let chat = Arc::new(MemoryChat::default());
    let reviews = Arc::new(MemoryReviews::default());
    let llm = Arc::new(MemoryLlm::default());
    let clock = Arc::new(MemoryClock::default());
    let secrets = Arc::new(MemorySecrets::default());

    let set = AdapterSet {
        vcs: vcs.clone(),
        tracker: tracker.clone(),
        chat: chat.clone(),
        reviews: reviews.clone(),
        llm: llm.clone(),
        clock: clock.clone(),
        secrets: secrets.clone(),
    };
    let handles = MemoryHandles {
        vcs,
        tracker,
        chat,
        reviews,
        llm,
        clock,
        secrets,
    };
    (set, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_tracker_conflict_on_duplicate_key() {
        let tracker = MemoryTracker::default();
        let ticket = NewTicket {
            title: "t".into(),
            body_md: "b".into(),
            labels: vec![],
            assignees: vec![],
            priority: 2,
            idempotency_key: "key-1".into(),
        };

        let first = tracker.create_ticket(&ticket, &deadline()).await.unwrap();
        let second = tracker.create_ticket(&ticket, &deadline()).await;

        let err = second.unwrap_err();
        assert_eq!(err.code(), "APR-052");
        // Conflict carries the existing ticket id for normalization
        match err {
            AutoPrError::Conflict { resource, .. } => assert_eq!(resource, first.id),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(tracker.ticket_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let chat = MemoryChat::default();
        chat.fail_next(2);

        assert!(chat.post_message("#ci", "a", &deadline()).await.is_err());
        assert!(chat.post_message("#ci", "b", &deadline()).await.is_err());
        assert!(chat.post_message("#ci", "c", &deadline()).await.is_ok());
        assert_eq!(chat.message_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_canned_responses() {
        let llm = MemoryLlm::default();
        llm.respond_with("security", "No vulnerabilities found.");

        let out = llm
            .complete("small-model", "Check security of auth.go", &deadline())
            .await
            .unwrap();
        assert_eq!(out.text, "No vulnerabilities found.");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_deadline_rejected_before_work() {
        let vcs = MemoryVcs::default();
        let expired = Deadline::after(Duration::ZERO);
        let err = vcs.list_files("o/r", 1, &expired).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Deadline);
    }

    #[test]
    fn test_memory_clock_advance() {
        let clock = MemoryClock::default();
        let before = clock.now();
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now() - before, chrono::Duration::days(1));
    }
}
