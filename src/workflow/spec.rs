//! Workflow file format: declarative YAML documents.
//!
//! Recognized top-level fields: `name`, `version`, `triggers`, `inputs`,
//! `steps`, `outputs`. Any unknown field is rejected at load with
//! `InvalidWorkflow`. Step dependencies are derived from
//! `${{ steps.<id>.outputs.<field> }}` references in `with:` and `when:`;
//! there is no separate edge list.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AutoPrError, Result};
use crate::ingress::WorkItemKind;
use crate::workflow::expr::Expr;
use crate::workflow::reference::extract_step_refs;

/// Failure policy for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnFailure {
    /// Run ends; downstream steps are skipped
    Abort,
    /// Downstream steps referencing this one are skipped unless defaulted
    Continue,
    /// Control jumps to the named step
    Fallback(String),
}

impl Default for OnFailure {
    fn default() -> Self {
        Self::Abort
    }
}

impl OnFailure {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "abort" => Some(Self::Abort),
            "continue" => Some(Self::Continue),
            other => {
                let inner = other.strip_prefix("fallback(")?.strip_suffix(')')?;
                let id = inner.trim();
                if id.is_empty() {
                    None
                } else {
                    Some(Self::Fallback(id.to_string()))
                }
            }
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Abort => "abort".to_string(),
            Self::Continue => "continue".to_string(),
            Self::Fallback(id) => format!("fallback({})", id),
        }
    }
}

impl Serialize for OnFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for OnFailure {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "on_failure must be abort, continue or fallback(<id>), got '{}'",
                s
            ))
        })
    }
}

/// One workflow trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    /// Event kind that fires this workflow
    pub on: String,
    /// Optional condition over the work item payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<String>,
}

/// Declared workflow input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub id: String,
    pub action: String,
    /// Literal inputs and `${{ ... }}` references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<Value>,
    /// Boolean expression over prior outputs; step is skipped when false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    /// Ready-set tie-break: higher runs first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Per-step timeout ("30s", "5m", "250ms")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl StepSpec {
    pub fn on_failure(&self) -> OnFailure {
        self.on_failure.clone().unwrap_or_default()
    }

    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Step ids this step references (its DAG predecessors).
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps = Vec::new();
        if let Some(ref with) = self.with {
            deps.extend(extract_step_refs(with));
        }
        if let Some(ref when) = self.when {
            deps.extend(crate::workflow::reference::step_refs_in_text(when));
        }
        deps.sort();
        deps.dedup();
        deps
    }

    pub fn timeout_duration(&self) -> Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }
}

/// A parsed, validated workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSpec {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,
    pub steps: Vec<StepSpec>,
    /// Workflow outputs: name → `${{ steps.<id>.outputs.<field> }}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl WorkflowSpec {
    /// Parse a YAML document and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: WorkflowSpec =
            serde_yaml::from_str(yaml).map_err(|e| AutoPrError::WorkflowParse {
                details: e.to_string(),
            })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serialize back to YAML (load → serialize → load is a fixed point).
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Version hash for cache invalidation and run records.
    pub fn version_hash(&self) -> String {
        use xxhash_rust::xxh3::xxh3_64;
        let mut material = String::new();
        material.push_str(&self.name);
        material.push_str(&self.version.to_string());
        for step in &self.steps {
            material.push_str(&step.id);
            material.push_str(&step.action);
        }
        format!("xxh3:{:016x}", xxh3_64(material.as_bytes()))
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural validation: triggers, unique ids, resolvable references,
    /// parseable expressions and timeouts. Cycle detection lives in the
    /// step graph.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AutoPrError::InvalidWorkflow {
                workflow: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        if self.version == 0 {
            return Err(AutoPrError::InvalidWorkflow {
                workflow: self.name.clone(),
                reason: "version must be >= 1".to_string(),
            });
        }
        if self.triggers.is_empty() {
            return Err(AutoPrError::NoTriggers {
                workflow: self.name.clone(),
            });
        }
        for trigger in &self.triggers {
            if WorkItemKind::parse(&trigger.on).is_none() {
                return Err(AutoPrError::InvalidWorkflow {
                    workflow: self.name.clone(),
                    reason: format!("unknown trigger event '{}'", trigger.on),
                });
            }
            if let Some(ref conditions) = trigger.conditions {
                Expr::parse(conditions)?;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(AutoPrError::DuplicateStep {
                    step_id: step.id.clone(),
                });
            }
        }

        for step in &self.steps {
            for dep in step.dependencies() {
                if !seen.contains(dep.as_str()) {
                    return Err(AutoPrError::MissingDependency {
                        step_id: step.id.clone(),
                        dep_id: dep,
                    });
                }
            }
            if let OnFailure::Fallback(ref target) = step.on_failure() {
                if !seen.contains(target.as_str()) {
                    return Err(AutoPrError::UnknownFallback {
                        step_id: step.id.clone(),
                        fallback_id: target.clone(),
                    });
                }
            }
            if let Some(ref when) = step.when {
                Expr::parse(when)?;
            }
            step.timeout_duration()?;
        }

        for (name, reference) in &self.outputs {
            let refs = crate::workflow::reference::step_refs_in_text(reference);
            if refs.is_empty() {
                return Err(AutoPrError::InvalidWorkflow {
                    workflow: self.name.clone(),
                    reason: format!("output '{}' does not reference a step", name),
                });
            }
            for dep in refs {
                if !seen.contains(dep.as_str()) {
                    return Err(AutoPrError::MissingDependency {
                        step_id: format!("outputs.{}", name),
                        dep_id: dep,
                    });
                }
            }
        }

        Ok(())
    }

    /// Whether a trigger fires for this event kind.
    pub fn triggered_by(&self, kind: WorkItemKind) -> bool {
        self.triggers
            .iter()
            .any(|t| WorkItemKind::parse(&t.on) == Some(kind))
    }
}

/// Parse "250ms", "30s", "5m", "1h" or a bare seconds integer.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit): (String, String) = {
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        (s[..split].to_string(), s[split..].trim().to_string())
    };
    let value: u64 = digits.parse().map_err(|_| AutoPrError::InvalidWorkflow {
        workflow: String::new(),
        reason: format!("invalid duration '{}'", s),
    })?;
    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(AutoPrError::InvalidWorkflow {
            workflow: String::new(),
            reason: format!("invalid duration unit in '{}'", s),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW_WORKFLOW: &str = r#"
name: pr-review
version: 1
triggers:
  - on: pr_opened
  - on: pr_updated
inputs:
  threshold:
    type: string
    default: low
steps:
  - id: fetch
    action: vcs.fetch_pr
  - id: analyze
    action: review.analyze
    with:
      files: ${{ steps.fetch.outputs.files }}
      threshold: ${{ inputs.threshold }}
  - id: notify
    action: chat.post
    when: steps.analyze.outputs.merge_block == true
    with:
      text: ${{ steps.analyze.outputs.summary }}
    on_failure: continue
outputs:
  blocked: ${{ steps.analyze.outputs.merge_block }}
"#;

    #[test]
    fn test_parse_valid_workflow() {
        let spec = WorkflowSpec::from_yaml(REVIEW_WORKFLOW).unwrap();
        assert_eq!(spec.name, "pr-review");
        assert_eq!(spec.version, 1);
        assert_eq!(spec.steps.len(), 3);
        assert!(spec.triggered_by(WorkItemKind::PrOpened));
        assert!(!spec.triggered_by(WorkItemKind::Manual));
    }

    #[test]
    fn test_dependencies_derived_from_references() {
        let spec = WorkflowSpec::from_yaml(REVIEW_WORKFLOW).unwrap();
        assert!(spec.step("fetch").unwrap().dependencies().is_empty());
        assert_eq!(spec.step("analyze").unwrap().dependencies(), vec!["fetch"]);
        assert_eq!(spec.step("notify").unwrap().dependencies(), vec!["analyze"]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
name: bad
version: 1
triggers: [{on: manual}]
steps: []
concurrency: 4
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-010");
    }

    #[test]
    fn test_empty_triggers_rejected() {
        let yaml = "name: no-triggers\nversion: 1\nsteps: []\n";
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-016");
    }

    #[test]
    fn test_unknown_trigger_event_rejected() {
        let yaml = "name: w\nversion: 1\ntriggers: [{on: push}]\nsteps: []\n";
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-011");
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let yaml = r#"
name: w
version: 1
triggers: [{on: manual}]
steps:
  - {id: a, action: x}
  - {id: a, action: y}
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-014");
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let yaml = r#"
name: w
version: 1
triggers: [{on: manual}]
steps:
  - id: a
    action: x
    with:
      v: ${{ steps.ghost.outputs.f }}
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-013");
    }

    #[test]
    fn test_unknown_fallback_rejected() {
        let yaml = r#"
name: w
version: 1
triggers: [{on: manual}]
steps:
  - {id: a, action: x, on_failure: fallback(ghost)}
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-015");
    }

    #[test]
    fn test_bad_when_expression_rejected() {
        let yaml = r#"
name: w
version: 1
triggers: [{on: manual}]
steps:
  - {id: a, action: x, when: "1 +"}
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "APR-017");
    }

    #[test]
    fn test_roundtrip_is_fixed_point() {
        let spec = WorkflowSpec::from_yaml(REVIEW_WORKFLOW).unwrap();
        let yaml = spec.to_yaml().unwrap();
        let reparsed = WorkflowSpec::from_yaml(&yaml).unwrap();
        let yaml_again = reparsed.to_yaml().unwrap();
        assert_eq!(yaml, yaml_again);
    }

    #[test]
    fn test_version_hash_stable_and_sensitive() {
        let a = WorkflowSpec::from_yaml(REVIEW_WORKFLOW).unwrap();
        let b = WorkflowSpec::from_yaml(REVIEW_WORKFLOW).unwrap();
        assert_eq!(a.version_hash(), b.version_hash());

        let different = REVIEW_WORKFLOW.replace("version: 1", "version: 2");
        let c = WorkflowSpec::from_yaml(&different).unwrap();
        assert_ne!(a.version_hash(), c.version_hash());
    }

    #[test]
    fn test_on_failure_parse() {
        assert_eq!(OnFailure::parse("abort"), Some(OnFailure::Abort));
        assert_eq!(OnFailure::parse("continue"), Some(OnFailure::Continue));
        assert_eq!(
            OnFailure::parse("fallback(cleanup)"),
            Some(OnFailure::Fallback("cleanup".into()))
        );
        assert_eq!(OnFailure::parse("retry"), None);
        assert_eq!(OnFailure::parse("fallback()"), None);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("5 fortnights").is_err());
        assert!(parse_duration("fast").is_err());
    }
}
