//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::engine::Services;
use crate::event::NoopEmitter;
use crate::ingress::WorkItem;
use crate::llm::RunBudget;
use crate::registry::ActionContext;
use crate::util::Deadline;

/// An ActionContext wired to the given in-memory services.
pub fn action_context(services: &Arc<Services>, repo: &str, pr_number: u64) -> ActionContext {
    ActionContext {
        run_id: Arc::from("run-test"),
        work_item: Arc::new(WorkItem::manual(repo, pr_number, json!({}))),
        deadline: Deadline::after(Duration::from_secs(10)),
        budget: Arc::new(RunBudget::new(1.0)),
        adapters: Arc::clone(&services.adapters),
        cache: Arc::clone(&services.cache),
        gates: Arc::clone(&services.gates),
        router: Arc::clone(&services.router),
        signatures: Arc::clone(&services.signatures),
        analyzer: Arc::clone(&services.analyzer),
        emitter: Arc::new(NoopEmitter::new()),
        attempts: Arc::new(std::sync::atomic::AtomicU32::new(0)),
    }
}
