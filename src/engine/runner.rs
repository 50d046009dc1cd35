//! The run loop: topological execution with deterministic tie-breaks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::error::{AutoPrError, ErrorKind, Result};
use crate::event::{EventKind, EventLog};
use crate::ingress::WorkItem;
use crate::llm::RunBudget;
use crate::registry::{Action, ActionContext, ActionRegistry};
use crate::resilience::IdempotencyClass;
use crate::util::Deadline;
use crate::workflow::{
    resolve_value, Expr, OnFailure, ResolutionContext, StepGraph, StepSpec, WorkflowSpec,
};

use super::result::{RunReport, RunStatus, StepResult, StepStatus};
use super::Services;

/// The workflow engine: one instance serves all runs.
pub struct Engine {
    registry: Arc<ActionRegistry>,
    services: Arc<Services>,
}

impl Engine {
    pub fn new(registry: Arc<ActionRegistry>, services: Arc<Services>) -> Self {
        Self { registry, services }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Execute a workflow for a work item with a fresh run id.
    pub async fn run(
        &self,
        spec: &WorkflowSpec,
        item: WorkItem,
        inputs: Value,
    ) -> Result<(RunReport, EventLog)> {
        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        self.run_with_id(&run_id, spec, item, inputs).await
    }

    /// Execute a workflow under a caller-provided run id (the ingress
    /// allocates ids before enqueueing).
    #[instrument(skip(self, spec, item, inputs), fields(workflow = %spec.name))]
    pub async fn run_with_id(
        &self,
        run_id: &str,
        spec: &WorkflowSpec,
        item: WorkItem,
        inputs: Value,
    ) -> Result<(RunReport, EventLog)> {
        spec.validate()?;
        let graph = StepGraph::from_spec(spec);
        graph.detect_cycles()?;
        for step in &spec.steps {
            if !self.registry.contains(&step.action) {
                return Err(AutoPrError::UnknownAction {
                    name: step.action.clone(),
                    step_id: step.id.clone(),
                });
            }
        }

        let started_at = Utc::now();
        let config = &self.services.config;
        let deadline = Deadline::after(Duration::from_secs(config.engine.run_deadline_secs));
        let budget = Arc::new(RunBudget::new(config.budgets.per_run_usd));
        let event_log = EventLog::new();
        let run_id_arc: Arc<str> = Arc::from(run_id);
        let work_item = Arc::new(item);

        let inputs = Arc::new(merged_inputs(spec, inputs));
        let event = Arc::new(json!({
            "repo": work_item.source_repo.clone(),
            "pr_number": work_item.pr_number,
            "actor": work_item.actor.clone(),
            "kind": work_item.kind.as_str(),
            "payload": work_item.payload.clone(),
        }));

        event_log.emit(EventKind::RunStarted {
            run_id: run_id.to_string(),
            workflow: spec.name.clone(),
            workflow_hash: spec.version_hash(),
            step_count: spec.steps.len(),
        });
        info!(run_id, steps = spec.steps.len(), "run started");

        let mut statuses: FxHashMap<Arc<str>, StepStatus> = graph
            .step_ids()
            .iter()
            .map(|id| (Arc::clone(id), StepStatus::Pending))
            .collect();
        let mut results: FxHashMap<Arc<str>, StepResult> = FxHashMap::default();
        let mut schedule_order: Vec<Arc<str>> = Vec::with_capacity(spec.steps.len());
        let mut jump_targets: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut aborting = false;

        let semaphore = Arc::new(Semaphore::new(config.engine.intra_run_parallelism.max(1)));
        let mut join_set: JoinSet<(Arc<str>, StepResult)> = JoinSet::new();
        let mut in_flight = 0usize;

        loop {
            let deadline_out = deadline.is_expired();

            // Skip propagation to a fixpoint: dependents of non-success
            // terminal steps can never run (fallback jump targets exempt).
            loop {
                let mut changed = false;
                for step in &spec.steps {
                    let id = find_id(&graph, &step.id);
                    if statuses[&id] != StepStatus::Pending {
                        continue;
                    }
                    if aborting || deadline_out {
                        let reason = if deadline_out {
                            "run deadline exceeded"
                        } else {
                            "run aborted by earlier failure"
                        };
                        mark_skipped(
                            &id, reason, &mut statuses, &mut results, &mut schedule_order,
                            &event_log,
                        );
                        changed = true;
                        continue;
                    }
                    if jump_targets.contains(&id) {
                        continue;
                    }
                    let blocked_by = graph.dependencies(&id).iter().find(|dep| {
                        let s = statuses[*dep];
                        s.is_terminal() && !s.is_success()
                    });
                    if let Some(dep) = blocked_by {
                        let reason = format!("upstream step '{}' did not succeed", dep);
                        mark_skipped(
                            &id, &reason, &mut statuses, &mut results, &mut schedule_order,
                            &event_log,
                        );
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            // Ready set: pending steps with all dependencies successful,
            // plus fallback jump targets. Tie-break: priority desc, id asc.
            let mut ready: Vec<&StepSpec> = spec
                .steps
                .iter()
                .filter(|step| {
                    let id = find_id(&graph, &step.id);
                    if statuses[&id] != StepStatus::Pending {
                        return false;
                    }
                    if jump_targets.contains(&id) {
                        return true;
                    }
                    graph
                        .dependencies(&id)
                        .iter()
                        .all(|dep| statuses[dep].is_success())
                })
                .collect();
            ready.sort_by(|a, b| {
                b.priority()
                    .cmp(&a.priority())
                    .then_with(|| a.id.cmp(&b.id))
            });

            if !(aborting || deadline_out) {
                // Snapshot of successful outputs visible to this batch
                let snapshot = Arc::new(output_snapshot(&results));
                for step in ready {
                    let id = find_id(&graph, &step.id);
                    statuses.insert(Arc::clone(&id), StepStatus::Scheduled);
                    schedule_order.push(Arc::clone(&id));
                    jump_targets.remove(&id);
                    event_log.emit(EventKind::StepScheduled {
                        step_id: Arc::clone(&id),
                        dependencies: graph.dependencies(&id).to_vec(),
                    });

                    let task = StepTask {
                        step: step.clone(),
                        action: self
                            .registry
                            .get(&step.action)
                            .unwrap_or_else(|| unreachable!("validated above")),
                        services: Arc::clone(&self.services),
                        run_id: Arc::clone(&run_id_arc),
                        work_item: Arc::clone(&work_item),
                        run_deadline: deadline.clone(),
                        budget: Arc::clone(&budget),
                        event_log: event_log.clone(),
                        inputs: Arc::clone(&inputs),
                        event: Arc::clone(&event),
                        snapshot: Arc::clone(&snapshot),
                        default_step_timeout: Duration::from_secs(
                            config.engine.step_timeout_secs,
                        ),
                    };
                    let semaphore = Arc::clone(&semaphore);
                    in_flight += 1;
                    join_set.spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        let id: Arc<str> = Arc::from(task.step.id.as_str());
                        let result = execute_step(task).await;
                        (id, result)
                    });
                }
            }

            if in_flight == 0 {
                let all_terminal = statuses.values().all(|s| s.is_terminal());
                if all_terminal {
                    break;
                }
                // A pending step with no path to readiness (should not
                // happen in a validated DAG)
                for step in &spec.steps {
                    let id = find_id(&graph, &step.id);
                    if !statuses[&id].is_terminal() {
                        warn!(step_id = %id, "step unreachable, skipping");
                        mark_skipped(
                            &id, "unreachable", &mut statuses, &mut results,
                            &mut schedule_order, &event_log,
                        );
                    }
                }
                break;
            }

            // Wait for one completion, then re-evaluate readiness
            let Some(joined) = join_set.join_next().await else {
                break;
            };
            in_flight -= 1;
            let (id, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    // A panicked step is an Internal failure, not a crash
                    warn!("step task panicked: {}", join_err);
                    continue;
                }
            };

            statuses.insert(Arc::clone(&id), result.status);
            let failed_non_skip =
                result.status.is_terminal() && !result.status.is_success()
                    && result.status != StepStatus::Skipped;
            if failed_non_skip {
                match spec.step(&id).map(|s| s.on_failure()).unwrap_or_default() {
                    OnFailure::Abort => aborting = true,
                    OnFailure::Continue => {}
                    OnFailure::Fallback(target) => {
                        let target_id = find_id(&graph, &target);
                        if statuses[&target_id] == StepStatus::Pending {
                            debug!(from = %id, to = %target, "fallback jump");
                            jump_targets.insert(target_id);
                        }
                    }
                }
            }
            results.insert(id, result);
        }

        // Assemble the report in schedule order (deterministic)
        let step_results: Vec<StepResult> = schedule_order
            .iter()
            .filter_map(|id| results.get(id).cloned())
            .collect();

        let snapshot = output_snapshot(&results);
        let outputs = resolve_outputs(spec, &snapshot, &inputs, &event);
        let merge_block = step_results.iter().any(|r| {
            r.is_success() && r.output.get("merge_block").and_then(Value::as_bool) == Some(true)
        });

        let status = run_status(&step_results, merge_block, deadline.is_expired(), aborting);
        let finished_at = Utc::now();
        let llm_cost = budget.spent();

        let counts = status_counts(&step_results);
        let summary = json!({
            "steps": counts,
            "merge_block": merge_block,
            "llm_cost_usd": llm_cost,
        });
        let message = format!(
            "{}: {}/{} steps ok ({} failed, {} skipped){}",
            status.as_str(),
            counts["ok"].as_u64().unwrap_or(0) + counts["cached"].as_u64().unwrap_or(0),
            spec.steps.len(),
            counts["failed"].as_u64().unwrap_or(0)
                + counts["timed_out"].as_u64().unwrap_or(0)
                + counts["circuit_open"].as_u64().unwrap_or(0),
            counts["skipped"].as_u64().unwrap_or(0),
            if merge_block { ", merge blocked" } else { "" },
        );

        event_log.emit(EventKind::RunCompleted {
            run_id: run_id.to_string(),
            status: status.as_str().to_string(),
            total_duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
        info!(run_id, status = status.as_str(), "run finished");

        Ok((
            RunReport {
                run_id: run_id.to_string(),
                workflow: spec.name.clone(),
                workflow_version_hash: spec.version_hash(),
                status,
                step_results,
                outputs,
                summary,
                message,
                started_at,
                finished_at,
                llm_cost,
            },
            event_log,
        ))
    }
}

/// Everything a spawned step task needs (all owned).
struct StepTask {
    step: StepSpec,
    action: Arc<dyn Action>,
    services: Arc<Services>,
    run_id: Arc<str>,
    work_item: Arc<WorkItem>,
    run_deadline: Deadline,
    budget: Arc<RunBudget>,
    event_log: EventLog,
    inputs: Arc<Value>,
    event: Arc<Value>,
    snapshot: Arc<FxHashMap<String, Value>>,
    default_step_timeout: Duration,
}

async fn execute_step(task: StepTask) -> StepResult {
    let step_id: Arc<str> = Arc::from(task.step.id.as_str());
    let started_at = Utc::now();
    let ctx = ResolutionContext {
        steps: &task.snapshot,
        inputs: &task.inputs,
        event: &task.event,
    };

    // when: gate
    if let Some(ref when) = task.step.when {
        match Expr::parse(when).and_then(|e| e.eval_bool(&task.step.id, &ctx)) {
            Ok(true) => {}
            Ok(false) => {
                let result = StepResult::skipped(Arc::clone(&step_id), "when=false");
                task.event_log.emit(EventKind::StepSkipped {
                    step_id,
                    reason: "when=false".to_string(),
                });
                return result;
            }
            Err(e) => return failed_result(step_id, e, started_at, 0, &task.event_log),
        }
    }

    // Resolve references, validate inputs
    let raw_inputs = task.step.with.clone().unwrap_or_else(|| json!({}));
    let resolved = match resolve_value(&task.step.id, &raw_inputs, &ctx) {
        Ok(v) => v,
        Err(e) => return failed_result(step_id, e, started_at, 0, &task.event_log),
    };
    let def = task.action.def().clone();
    let validated = match def
        .input_schema
        .validate(&resolved, &format!("{}.with", task.step.id))
    {
        Ok(v) => v,
        Err(e) => return failed_result(step_id, e, started_at, 0, &task.event_log),
    };

    // Effective timeout: min(step timeout, remaining run deadline)
    let step_timeout = task
        .step
        .timeout_duration()
        .ok()
        .flatten()
        .or(def.timeout)
        .unwrap_or(task.default_step_timeout);
    let step_deadline = task.run_deadline.child(step_timeout);

    let attempts = Arc::new(AtomicU32::new(0));
    let action_ctx = ActionContext {
        run_id: Arc::clone(&task.run_id),
        work_item: Arc::clone(&task.work_item),
        deadline: step_deadline.clone(),
        budget: Arc::clone(&task.budget),
        adapters: Arc::clone(&task.services.adapters),
        cache: Arc::clone(&task.services.cache),
        gates: Arc::clone(&task.services.gates),
        router: Arc::clone(&task.services.router),
        signatures: Arc::clone(&task.services.signatures),
        analyzer: Arc::clone(&task.services.analyzer),
        emitter: Arc::new(task.event_log.clone()),
        attempts: Arc::clone(&attempts),
    };

    task.event_log.emit(EventKind::StepStarted {
        step_id: Arc::clone(&step_id),
        inputs: validated.clone(),
    });

    // Cacheable non-effectful actions read through the shared cache
    let use_cache = def.cacheable && def.idempotency_class != IdempotencyClass::Effectful;
    let outcome: Result<(Value, bool)> = if use_cache {
        // The PR identity is part of the key: actions resolve repo/pr from
        // the work item, so identical `with:` blocks still differ per PR
        let cache_inputs = json!({
            "action": def.name.clone(),
            "repo": task.work_item.source_repo,
            "pr_number": task.work_item.pr_number,
            "inputs": validated.clone(),
        });
        let action = Arc::clone(&task.action);
        let inner_ctx = action_ctx.clone();
        let inner_deadline = step_deadline.clone();
        let step_name = task.step.id.clone();
        task.services
            .cache
            .get_or_compute("actions", &cache_inputs, move || async move {
                inner_deadline
                    .bound(&step_name, action.run(&inner_ctx, validated))
                    .await
            })
            .await
            .map(|(value, hit)| ((*value).clone(), hit))
    } else {
        step_deadline
            .bound(&task.step.id, task.action.run(&action_ctx, validated))
            .await
            .map(|v| (v, false))
    };

    let attempts_made = attempts.load(Ordering::SeqCst).max(1);
    match outcome {
        Ok((output, cache_hit)) => {
            let output = match def
                .output_schema
                .validate(&output, &format!("{}.outputs", task.step.id))
            {
                Ok(v) => v,
                Err(e) => {
                    return failed_result(step_id, e, started_at, attempts_made, &task.event_log)
                }
            };
            let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
            let result = if cache_hit {
                StepResult::cached(Arc::clone(&step_id), output, started_at)
            } else {
                StepResult::ok(Arc::clone(&step_id), output, started_at, attempts_made)
            };
            task.event_log.emit(EventKind::StepCompleted {
                step_id,
                output: Arc::clone(&result.output),
                duration_ms,
                attempts: result.attempts,
                cache_hit,
            });
            result
        }
        Err(e) => failed_result(step_id, e, started_at, attempts_made, &task.event_log),
    }
}

fn failed_result(
    step_id: Arc<str>,
    error: AutoPrError,
    started_at: chrono::DateTime<Utc>,
    attempts: u32,
    event_log: &EventLog,
) -> StepResult {
    let kind = error.kind();
    let status = match kind {
        ErrorKind::Timeout | ErrorKind::Deadline | ErrorKind::Cancelled => StepStatus::TimedOut,
        ErrorKind::CircuitOpen => StepStatus::CircuitOpen,
        _ => StepStatus::Failed,
    };
    let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
    event_log.emit(EventKind::StepFailed {
        step_id: Arc::clone(&step_id),
        error: error.to_string(),
        error_kind: kind.to_string(),
        duration_ms,
    });
    StepResult::failed(step_id, status, error.to_string(), kind, started_at, attempts)
}

fn find_id(graph: &StepGraph, id: &str) -> Arc<str> {
    graph
        .step_ids()
        .iter()
        .find(|s| s.as_ref() == id)
        .cloned()
        .unwrap_or_else(|| Arc::from(id))
}

fn mark_skipped(
    id: &Arc<str>,
    reason: &str,
    statuses: &mut FxHashMap<Arc<str>, StepStatus>,
    results: &mut FxHashMap<Arc<str>, StepResult>,
    schedule_order: &mut Vec<Arc<str>>,
    event_log: &EventLog,
) {
    statuses.insert(Arc::clone(id), StepStatus::Skipped);
    results.insert(
        Arc::clone(id),
        StepResult::skipped(Arc::clone(id), reason),
    );
    schedule_order.push(Arc::clone(id));
    event_log.emit(EventKind::StepSkipped {
        step_id: Arc::clone(id),
        reason: reason.to_string(),
    });
}

fn merged_inputs(spec: &WorkflowSpec, provided: Value) -> Value {
    let mut merged = serde_json::Map::new();
    for (name, input) in &spec.inputs {
        if let Some(ref default) = input.default {
            merged.insert(name.clone(), default.clone());
        }
    }
    if let Value::Object(map) = provided {
        for (k, v) in map {
            merged.insert(k, v);
        }
    }
    Value::Object(merged)
}

fn output_snapshot(results: &FxHashMap<Arc<str>, StepResult>) -> FxHashMap<String, Value> {
    results
        .iter()
        .filter(|(_, r)| r.is_success())
        .map(|(id, r)| (id.to_string(), (*r.output).clone()))
        .collect()
}

fn resolve_outputs(
    spec: &WorkflowSpec,
    snapshot: &FxHashMap<String, Value>,
    inputs: &Value,
    event: &Value,
) -> Value {
    let ctx = ResolutionContext {
        steps: snapshot,
        inputs,
        event,
    };
    let mut outputs = serde_json::Map::new();
    for (name, reference) in &spec.outputs {
        match resolve_value("outputs", &Value::String(reference.clone()), &ctx) {
            Ok(v) => {
                outputs.insert(name.clone(), v);
            }
            Err(e) => {
                debug!(output = %name, "workflow output unresolved: {}", e);
            }
        }
    }
    Value::Object(outputs)
}

fn run_status(
    step_results: &[StepResult],
    merge_block: bool,
    deadline_expired: bool,
    aborted: bool,
) -> RunStatus {
    if merge_block {
        return RunStatus::Blocked;
    }
    if deadline_expired {
        return RunStatus::Cancelled;
    }
    let any_failure = step_results.iter().any(|r| {
        matches!(
            r.status,
            StepStatus::Failed | StepStatus::TimedOut | StepStatus::CircuitOpen
        )
    });
    if aborted {
        return RunStatus::Failed;
    }
    if any_failure {
        return RunStatus::Partial;
    }
    RunStatus::Ok
}

fn status_counts(step_results: &[StepResult]) -> Value {
    let count = |status: StepStatus| {
        step_results.iter().filter(|r| r.status == status).count() as u64
    };
    json!({
        "ok": count(StepStatus::Ok),
        "cached": count(StepStatus::Cached),
        "failed": count(StepStatus::Failed),
        "timed_out": count(StepStatus::TimedOut),
        "circuit_open": count(StepStatus::CircuitOpen),
        "skipped": count(StepStatus::Skipped),
    })
}
