//! Worker pool: pulls WorkItems off the run queue and drives the engine.
//!
//! Runs for the same `(repo, pr_number)` are serialized through a keyed
//! async mutex; a contender that cannot take the lock within the configured
//! wait fails with `PrBusy` instead of queueing forever. Workflow selection
//! matches the work item's kind against each workflow's triggers, then
//! evaluates trigger conditions over the event payload.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::{Engine, RunReport};
use crate::error::{AutoPrError, Result};
use crate::event::EventLog;
use crate::ingress::{RunQueueReceiver, WorkItem};
use crate::state::StateStore;
use crate::workflow::{Expr, ResolutionContext, WorkflowSpec};

/// Per-PR serialization locks, keyed `repo#pr`.
#[derive(Default, Clone)]
pub struct PrLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PrLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, repo: &str, pr_number: u64) -> Arc<Mutex<()>> {
        let key = format!("{}#{}", repo, pr_number);
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the PR lock within `wait`, else `PrBusy`.
    pub async fn acquire(
        &self,
        repo: &str,
        pr_number: u64,
        wait: Duration,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(repo, pr_number);
        tokio::time::timeout(wait, lock.lock_owned())
            .await
            .map_err(|_| AutoPrError::PrBusy {
                repo: repo.to_string(),
                pr_number,
            })
    }
}

/// Dispatches one work item against the registered workflows.
pub struct Dispatcher {
    engine: Arc<Engine>,
    workflows: Vec<Arc<WorkflowSpec>>,
    locks: PrLocks,
    store: Option<Arc<StateStore>>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>, workflows: Vec<WorkflowSpec>) -> Self {
        Self {
            engine,
            workflows: workflows.into_iter().map(Arc::new).collect(),
            locks: PrLocks::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn locks(&self) -> &PrLocks {
        &self.locks
    }

    /// Workflows whose triggers fire for this item (kind + conditions).
    pub fn matching_workflows(&self, item: &WorkItem) -> Vec<Arc<WorkflowSpec>> {
        let event = json!({
            "repo": item.source_repo.clone(),
            "pr_number": item.pr_number,
            "actor": item.actor.clone(),
            "kind": item.kind.as_str(),
            "payload": item.payload.clone(),
        });
        self.workflows
            .iter()
            .filter(|spec| trigger_matches(spec, item, &event))
            .cloned()
            .collect()
    }

    /// Run every matching workflow for the item, serialized per PR.
    pub async fn dispatch(&self, item: WorkItem) -> Result<Vec<RunReport>> {
        let wait = Duration::from_secs(
            self.engine.services().config.engine.pr_lock_wait_secs,
        );
        let _guard = self
            .locks
            .acquire(&item.source_repo, item.pr_number, wait)
            .await?;

        let mut reports = Vec::new();
        for spec in self.matching_workflows(&item) {
            let (report, events) = self
                .engine
                .run(&spec, item.clone(), item.payload.clone())
                .await?;
            self.persist(&report, &spec, &events);
            info!(
                run_id = %report.run_id,
                workflow = %spec.name,
                status = report.status.as_str(),
                "dispatched run"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    fn persist(&self, report: &RunReport, spec: &WorkflowSpec, events: &EventLog) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_run(report, spec, events) {
                warn!(run_id = %report.run_id, "failed to persist run: {}", e);
            }
        }
    }
}

fn trigger_matches(spec: &WorkflowSpec, item: &WorkItem, event: &Value) -> bool {
    if !spec.triggered_by(item.kind) {
        return false;
    }
    let empty_steps = FxHashMap::default();
    let empty_inputs = json!({});
    let ctx = ResolutionContext {
        steps: &empty_steps,
        inputs: &empty_inputs,
        event,
    };
    spec.triggers.iter().any(|trigger| {
        if crate::ingress::WorkItemKind::parse(&trigger.on) != Some(item.kind) {
            return false;
        }
        match trigger.conditions {
            None => true,
            Some(ref conditions) => Expr::parse(conditions)
                .and_then(|e| e.eval_bool("trigger", &ctx))
                .unwrap_or(false),
        }
    })
}

/// Fixed pool of workers draining the ingress queue.
pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
}

impl WorkerPool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Drain the queue until all senders are dropped. Each worker runs one
    /// workflow at a time; intra-run parallelism lives in the engine.
    pub async fn run(&self, mut queue: RunQueueReceiver, workers: usize) {
        let (tx, rx) = async_channel_pair(workers.max(1));
        let mut handles = Vec::new();
        for worker_id in 0..workers.max(1) {
            let rx = rx.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            handles.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else { break };
                    if let Err(e) = dispatcher.dispatch(item).await {
                        warn!(worker_id, "dispatch failed: {}", e);
                    }
                }
            }));
        }

        while let Some(item) = queue.recv().await {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        drop(tx);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

type SharedReceiver = Arc<Mutex<tokio::sync::mpsc::Receiver<WorkItem>>>;

fn async_channel_pair(capacity: usize) -> (tokio::sync::mpsc::Sender<WorkItem>, SharedReceiver) {
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::builtin_registry;
    use crate::config::AutoPrConfig;
    use crate::engine::Services;
    use crate::ingress::WorkItemKind;

    fn manual_workflow(yaml_conditions: Option<&str>) -> WorkflowSpec {
        let conditions = yaml_conditions
            .map(|c| format!(", conditions: \"{}\"", c))
            .unwrap_or_default();
        WorkflowSpec::from_yaml(&format!(
            "name: w\nversion: 1\ntriggers: [{{on: manual{}}}]\nsteps: []\n",
            conditions
        ))
        .unwrap()
    }

    fn dispatcher(workflows: Vec<WorkflowSpec>) -> Dispatcher {
        let (services, _handles) = Services::in_memory(AutoPrConfig::default()).unwrap();
        let engine = Arc::new(Engine::new(builtin_registry().unwrap(), services));
        Dispatcher::new(engine, workflows)
    }

    #[test]
    fn test_matching_by_kind() {
        let d = dispatcher(vec![manual_workflow(None)]);
        let manual = WorkItem::manual("o/r", 1, json!({}));
        assert_eq!(d.matching_workflows(&manual).len(), 1);

        let opened =
            WorkItem::from_payload("gh", WorkItemKind::PrOpened, json!({"repo": "o/r", "pr_number": 1}))
                .unwrap();
        assert!(d.matching_workflows(&opened).is_empty());
    }

    #[test]
    fn test_trigger_conditions_evaluated() {
        let d = dispatcher(vec![manual_workflow(Some("event.pr_number > 10"))]);
        let small = WorkItem::manual("o/r", 1, json!({}));
        let big = WorkItem::manual("o/r", 42, json!({}));
        assert!(d.matching_workflows(&small).is_empty());
        assert_eq!(d.matching_workflows(&big).len(), 1);
    }

    #[tokio::test]
    async fn test_pr_lock_serializes_and_times_out() {
        let locks = PrLocks::new();
        let guard = locks
            .acquire("o/r", 7, Duration::from_millis(50))
            .await
            .unwrap();

        let err = locks
            .acquire("o/r", 7, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "APR-033");

        drop(guard);
        assert!(locks.acquire("o/r", 7, Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_different_prs_not_serialized() {
        let locks = PrLocks::new();
        let _a = locks.acquire("o/r", 1, Duration::from_millis(20)).await.unwrap();
        assert!(locks.acquire("o/r", 2, Duration::from_millis(20)).await.is_ok());
    }
}
