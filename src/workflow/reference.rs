//! Output references: `${{ steps.<id>.outputs.<field> }}`.
//!
//! References appear inside `with:` values and workflow `outputs:`. A
//! string that is exactly one reference resolves to the referenced value
//! (any JSON type); a string with embedded references interpolates their
//! stringified forms. Resolution failures are hard errors
//! (`UnresolvedReference`), never silent nulls.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{AutoPrError, Result};

const REF_OPEN: &str = "${{";
const REF_CLOSE: &str = "}}";

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// `steps.<id>.outputs.<field>[.<subfield>...]`
    StepOutput { step: String, path: Vec<String> },
    /// `inputs.<name>`
    Input { name: String },
    /// `event.<field>[...]`: the triggering work item
    Event { path: Vec<String> },
}

/// Parse the inside of a `${{ ... }}` span.
pub fn parse_ref(step_id: &str, inner: &str) -> Result<RefTarget> {
    let segments: Vec<&str> = inner.trim().split('.').collect();
    match segments.as_slice() {
        ["steps", step, "outputs", rest @ ..] if !step.is_empty() => Ok(RefTarget::StepOutput {
            step: step.to_string(),
            path: rest.iter().map(|s| s.to_string()).collect(),
        }),
        ["inputs", name] if !name.is_empty() => Ok(RefTarget::Input {
            name: name.to_string(),
        }),
        ["event", rest @ ..] if !rest.is_empty() => Ok(RefTarget::Event {
            path: rest.iter().map(|s| s.to_string()).collect(),
        }),
        _ => Err(AutoPrError::UnresolvedReference {
            step_id: step_id.to_string(),
            reference: inner.trim().to_string(),
        }),
    }
}

/// All `${{ ... }}` spans in a string, as (start, end, inner) triples.
fn ref_spans(text: &str) -> Vec<(usize, usize, &str)> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find(REF_OPEN) {
        let start = cursor + open;
        let Some(close) = text[start + REF_OPEN.len()..].find(REF_CLOSE) else {
            break;
        };
        let inner_start = start + REF_OPEN.len();
        let end = inner_start + close + REF_CLOSE.len();
        spans.push((start, end, text[inner_start..inner_start + close].trim()));
        cursor = end;
    }
    spans
}

/// Step ids referenced anywhere in a text: inside `${{ }}` spans and as
/// bare `steps.<id>` paths (the `when:` expression form).
pub fn step_refs_in_text(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let needle = b"steps.";
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            let preceded_ok = i == 0 || {
                let c = bytes[i - 1] as char;
                !c.is_ascii_alphanumeric() && c != '_' && c != '.'
            };
            if preceded_ok {
                let rest = &text[i + needle.len()..];
                let id: String = rest
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                    .collect();
                if !id.is_empty() {
                    refs.push(id);
                }
            }
            i += needle.len();
        } else {
            i += 1;
        }
    }
    refs.sort();
    refs.dedup();
    refs
}

/// Step ids referenced anywhere in a JSON value tree.
pub fn extract_step_refs(value: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs.sort();
    refs.dedup();
    refs
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(step_refs_in_text(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

/// Everything references resolve against.
pub struct ResolutionContext<'a> {
    /// Completed step outputs by id
    pub steps: &'a FxHashMap<String, Value>,
    /// Workflow inputs (object)
    pub inputs: &'a Value,
    /// Work-item summary (object: repo, pr_number, actor, kind, payload)
    pub event: &'a Value,
}

impl ResolutionContext<'_> {
    /// Resolve a parsed target to a value.
    pub fn lookup(&self, step_id: &str, target: &RefTarget) -> Result<Value> {
        let unresolved = |reference: String| AutoPrError::UnresolvedReference {
            step_id: step_id.to_string(),
            reference,
        };
        match target {
            RefTarget::StepOutput { step, path } => {
                let output = self
                    .steps
                    .get(step)
                    .ok_or_else(|| unresolved(format!("steps.{}.outputs", step)))?;
                descend(output, path).ok_or_else(|| {
                    unresolved(format!("steps.{}.outputs.{}", step, path.join(".")))
                })
            }
            RefTarget::Input { name } => self
                .inputs
                .get(name)
                .cloned()
                .ok_or_else(|| unresolved(format!("inputs.{}", name))),
            RefTarget::Event { path } => descend(self.event, path)
                .ok_or_else(|| unresolved(format!("event.{}", path.join(".")))),
        }
    }

    /// Path lookup for the expression language (`steps.x.outputs.y`,
    /// `inputs.k`, `event.f`).
    pub fn lookup_path(&self, step_id: &str, segments: &[String]) -> Result<Value> {
        let joined = segments.join(".");
        let target = parse_ref(step_id, &joined)?;
        self.lookup(step_id, &target)
    }
}

fn descend(value: &Value, path: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Resolve every reference inside a `with:` value tree.
pub fn resolve_value(step_id: &str, value: &Value, ctx: &ResolutionContext) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(step_id, s, ctx),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| resolve_value(step_id, v, ctx))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(step_id, v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(step_id: &str, text: &str, ctx: &ResolutionContext) -> Result<Value> {
    let spans = ref_spans(text);
    if spans.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    // A string that is exactly one reference keeps the referenced type
    if spans.len() == 1 {
        let (start, end, inner) = spans[0];
        if text[..start].trim().is_empty() && text[end..].trim().is_empty() {
            let target = parse_ref(step_id, inner)?;
            return ctx.lookup(step_id, &target);
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, inner) in spans {
        out.push_str(&text[cursor..start]);
        let target = parse_ref(step_id, inner)?;
        let value = ctx.lookup(step_id, &target)?;
        match value {
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_string()),
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_fixtures() -> (FxHashMap<String, Value>, Value, Value) {
        let mut steps = FxHashMap::default();
        steps.insert(
            "fetch".to_string(),
            json!({"files": ["a.ts", "b.ts"], "pr": {"title": "Fix parser"}}),
        );
        let inputs = json!({"threshold": "low"});
        let event = json!({"repo": "o/r", "pr_number": 42});
        (steps, inputs, event)
    }

    #[test]
    fn test_parse_ref_forms() {
        assert_eq!(
            parse_ref("s", "steps.fetch.outputs.files").unwrap(),
            RefTarget::StepOutput {
                step: "fetch".into(),
                path: vec!["files".into()]
            }
        );
        assert_eq!(
            parse_ref("s", "inputs.threshold").unwrap(),
            RefTarget::Input {
                name: "threshold".into()
            }
        );
        assert!(parse_ref("s", "steps.fetch.files").is_err());
        assert!(parse_ref("s", "secrets.key").is_err());
    }

    #[test]
    fn test_whole_string_ref_keeps_type() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let resolved = resolve_value(
            "s",
            &json!("${{ steps.fetch.outputs.files }}"),
            &ctx,
        )
        .unwrap();
        assert_eq!(resolved, json!(["a.ts", "b.ts"]));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let resolved = resolve_value(
            "s",
            &json!("PR ${{ event.pr_number }}: ${{ steps.fetch.outputs.pr.title }}"),
            &ctx,
        )
        .unwrap();
        assert_eq!(resolved, json!("PR 42: Fix parser"));
    }

    #[test]
    fn test_missing_reference_is_hard_error() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let err = resolve_value("notify", &json!("${{ steps.ghost.outputs.x }}"), &ctx)
            .unwrap_err();
        assert_eq!(err.code(), "APR-022");
    }

    #[test]
    fn test_missing_field_is_hard_error() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let err =
            resolve_value("s", &json!("${{ steps.fetch.outputs.ghost }}"), &ctx).unwrap_err();
        assert_eq!(err.code(), "APR-022");
    }

    #[test]
    fn test_nested_values_resolved() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let resolved = resolve_value(
            "s",
            &json!({"cfg": {"t": "${{ inputs.threshold }}"}, "n": 1}),
            &ctx,
        )
        .unwrap();
        assert_eq!(resolved, json!({"cfg": {"t": "low"}, "n": 1}));
    }

    #[test]
    fn test_step_refs_in_text_finds_bare_and_wrapped() {
        assert_eq!(
            step_refs_in_text("steps.analyze.outputs.x == true"),
            vec!["analyze"]
        );
        assert_eq!(
            step_refs_in_text("${{ steps.fetch.outputs.files }}"),
            vec!["fetch"]
        );
        assert_eq!(
            step_refs_in_text("len(steps.a.outputs.l) > 0 && steps.b.outputs.ok"),
            vec!["a", "b"]
        );
        assert!(step_refs_in_text("no refs here").is_empty());
        // `mysteps.x` must not count
        assert!(step_refs_in_text("mysteps.x.outputs.y").is_empty());
    }

    #[test]
    fn test_array_index_path() {
        let (steps, inputs, event) = ctx_fixtures();
        let ctx = ResolutionContext {
            steps: &steps,
            inputs: &inputs,
            event: &event,
        };
        let resolved =
            resolve_value("s", &json!("${{ steps.fetch.outputs.files.0 }}"), &ctx).unwrap();
        assert_eq!(resolved, json!("a.ts"));
    }
}
