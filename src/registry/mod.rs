//! Action Registry
//!
//! Holds the callable action definitions with schema'd inputs and outputs.
//! Registration is one-shot at process start; duplicate names fail fast.
//! The engine resolves steps through the registry and validates inputs and
//! outputs against the declared schemas at every call site.

pub mod schema;

pub use schema::{Constraints, FieldSpec, FieldType, Schema};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::AdapterSet;
use crate::cache::Cache;
use crate::detect::SignatureRegistry;
use crate::error::{AutoPrError, Result};
use crate::event::EventEmitter;
use crate::ingress::WorkItem;
use crate::llm::{LlmRouter, RunBudget};
use crate::resilience::{IdempotencyClass, ServiceGates};
use crate::review::Analyzer;
use crate::util::Deadline;

/// Immutable definition of one registered action.
#[derive(Debug, Clone)]
pub struct ActionDef {
    pub name: String,
    pub description: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub idempotency_class: IdempotencyClass,
    /// Default step timeout when the workflow does not set one
    pub timeout: Option<Duration>,
    /// Credential scopes the action needs at runtime
    pub required_scopes: Vec<String>,
    /// Whether the engine may serve this action's output from the cache.
    /// LLM calls are cached by the router itself, run-scoped actions must
    /// not be cached at all.
    pub cacheable: bool,
}

impl ActionDef {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: Schema::open(),
            output_schema: Schema::open(),
            idempotency_class: IdempotencyClass::Read,
            timeout: None,
            required_scopes: Vec::new(),
            cacheable: false,
        }
    }

    pub fn with_inputs(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_outputs(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn idempotency(mut self, class: IdempotencyClass) -> Self {
        self.idempotency_class = class;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.required_scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

/// Everything an action may touch at runtime.
///
/// Owned by the engine per step; actions never mutate the run context
/// directly, they only return outputs.
#[derive(Clone)]
pub struct ActionContext {
    pub run_id: Arc<str>,
    pub work_item: Arc<WorkItem>,
    pub deadline: Deadline,
    pub budget: Arc<RunBudget>,
    pub adapters: Arc<AdapterSet>,
    pub cache: Arc<Cache>,
    pub gates: Arc<ServiceGates>,
    pub router: Arc<LlmRouter>,
    pub signatures: Arc<SignatureRegistry>,
    pub analyzer: Arc<Analyzer>,
    pub emitter: Arc<dyn EventEmitter>,
    /// Outbound attempt counter for the current step (drives
    /// `StepResult.attempts`)
    pub attempts: Arc<std::sync::atomic::AtomicU32>,
}

impl ActionContext {
    /// Label identifying the credential configured for an endpoint,
    /// without exposing the secret itself.
    ///
    /// Resolves `AUTOPR_<ENDPOINT>_TOKEN` through the secrets adapter and
    /// returns a short fingerprint of the value, or `"default"` when no
    /// credential is configured. Distinct tokens get distinct circuit
    /// breakers; the secret never appears in a breaker key or log line.
    pub fn credential_label(&self, endpoint: &str) -> String {
        let var = format!("AUTOPR_{}_TOKEN", endpoint.to_ascii_uppercase());
        match self.adapters.secrets.get(&var) {
            Some(secret) => crate::util::hex_sha256(secret.as_bytes())[..8].to_string(),
            None => "default".to_string(),
        }
    }

    /// Make an outbound adapter call through the full resilience stack.
    ///
    /// `endpoint` keys the metrics; the breaker is keyed by
    /// `(endpoint, credential-label)` and the rate-limit bucket by the
    /// source repo. Every invocation of `op` counts toward the step's
    /// attempt total.
    pub async fn call_gated<T, F, Fut>(
        &self,
        endpoint: &str,
        class: IdempotencyClass,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let credential = self.credential_label(endpoint);
        let attempts = Arc::clone(&self.attempts);
        let op = &op;
        self.gates
            .call(
                endpoint,
                &credential,
                &self.work_item.source_repo,
                class,
                &self.deadline,
                move || {
                    attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    op()
                },
            )
            .await
    }
}

/// A callable unit of work.
#[async_trait]
pub trait Action: Send + Sync {
    fn def(&self) -> &ActionDef;
    async fn run(&self, ctx: &ActionContext, inputs: Value) -> Result<Value>;
}

/// Process-wide action registry; immutable after startup registration.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action; duplicate names fail fast.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<()> {
        let name = action.def().name.clone();
        if self.actions.contains_key(&name) {
            return Err(AutoPrError::DuplicateAction { name });
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}
