//! Typed input/output schemas for actions.
//!
//! A deliberately closed type list (string, int, float, bool, enum,
//! list<T>, map<string,T>, struct) with required/default/constraint
//! handling. Validation happens at every call site; violations surface as
//! `InvalidInput` or `SchemaMismatch` with the field location.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AutoPrError, Result};

/// Closed set of field types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Enum { variants: Vec<String> },
    List { item: Box<FieldType> },
    Map { value: Box<FieldType> },
    Struct { fields: Vec<FieldSpec> },
}

impl FieldType {
    fn name(&self) -> String {
        match self {
            Self::String => "string".into(),
            Self::Int => "int".into(),
            Self::Float => "float".into(),
            Self::Bool => "bool".into(),
            Self::Enum { .. } => "enum".into(),
            Self::List { item } => format!("list<{}>", item.name()),
            Self::Map { value } => format!("map<string,{}>", value.name()),
            Self::Struct { .. } => "struct".into(),
        }
    }
}

/// Numeric/length constraints on a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

impl Constraints {
    fn check_number(&self, location: &str, n: f64) -> Result<()> {
        if let Some(min) = self.min {
            if n < min {
                return Err(AutoPrError::InvalidInput {
                    location: location.to_string(),
                    reason: format!("{} is below minimum {}", n, min),
                });
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(AutoPrError::InvalidInput {
                    location: location.to_string(),
                    reason: format!("{} is above maximum {}", n, max),
                });
            }
        }
        Ok(())
    }

    fn check_len(&self, location: &str, len: usize) -> Result<()> {
        if let Some(min) = self.min_len {
            if len < min {
                return Err(AutoPrError::InvalidInput {
                    location: location.to_string(),
                    reason: format!("length {} is below minimum {}", len, min),
                });
            }
        }
        if let Some(max) = self.max_len {
            if len > max {
                return Err(AutoPrError::InvalidInput {
                    location: location.to_string(),
                    reason: format!("length {} is above maximum {}", len, max),
                });
            }
        }
        Ok(())
    }
}

/// One named field in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub constraints: Constraints,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
            constraints: Constraints::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// An object schema: the shape of action inputs or outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// A schema accepting any object (used for passthrough outputs).
    pub fn open() -> Self {
        Self { fields: Vec::new() }
    }

    /// Validate an object against this schema, applying defaults.
    ///
    /// Unknown fields are passed through untouched (outputs evolve
    /// additively); declared fields are checked for presence, type and
    /// constraints.
    pub fn validate(&self, value: &Value, location: &str) -> Result<Value> {
        let Some(object) = value.as_object() else {
            return Err(AutoPrError::SchemaMismatch {
                location: location.to_string(),
                expected: "object".to_string(),
                actual: type_of(value).to_string(),
            });
        };

        let mut out: Map<String, Value> = object.clone();
        for field in &self.fields {
            let field_loc = format!("{}.{}", location, field.name);
            match object.get(&field.name) {
                Some(v) if !v.is_null() => {
                    let checked = check_type(&field.field_type, &field.constraints, v, &field_loc)?;
                    out.insert(field.name.clone(), checked);
                }
                _ => {
                    if let Some(ref default) = field.default {
                        out.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        return Err(AutoPrError::InvalidInput {
                            location: field_loc,
                            reason: "required field missing".to_string(),
                        });
                    }
                }
            }
        }
        Ok(Value::Object(out))
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn mismatch(location: &str, expected: &FieldType, actual: &Value) -> AutoPrError {
    AutoPrError::SchemaMismatch {
        location: location.to_string(),
        expected: expected.name(),
        actual: type_of(actual).to_string(),
    }
}

fn check_type(
    field_type: &FieldType,
    constraints: &Constraints,
    value: &Value,
    location: &str,
) -> Result<Value> {
    match field_type {
        FieldType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            constraints.check_len(location, s.chars().count())?;
            Ok(value.clone())
        }
        FieldType::Int => {
            let n = value
                .as_i64()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            constraints.check_number(location, n as f64)?;
            Ok(value.clone())
        }
        FieldType::Float => {
            let n = value
                .as_f64()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            constraints.check_number(location, n)?;
            Ok(value.clone())
        }
        FieldType::Bool => {
            value
                .as_bool()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            Ok(value.clone())
        }
        FieldType::Enum { variants } => {
            let s = value
                .as_str()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            if !variants.iter().any(|v| v == s) {
                return Err(AutoPrError::InvalidInput {
                    location: location.to_string(),
                    reason: format!("'{}' is not one of [{}]", s, variants.join(", ")),
                });
            }
            Ok(value.clone())
        }
        FieldType::List { item } => {
            let items = value
                .as_array()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            constraints.check_len(location, items.len())?;
            let checked: Result<Vec<Value>> = items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    check_type(item, &Constraints::default(), v, &format!("{}[{}]", location, i))
                })
                .collect();
            Ok(Value::Array(checked?))
        }
        FieldType::Map { value: value_type } => {
            let map = value
                .as_object()
                .ok_or_else(|| mismatch(location, field_type, value))?;
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(
                    k.clone(),
                    check_type(
                        value_type,
                        &Constraints::default(),
                        v,
                        &format!("{}.{}", location, k),
                    )?,
                );
            }
            Ok(Value::Object(out))
        }
        FieldType::Struct { fields } => Schema::new(fields.clone()).validate(value, location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldSpec::new("repo", FieldType::String).required(),
            FieldSpec::new("pr_number", FieldType::Int)
                .required()
                .with_constraints(Constraints {
                    min: Some(1.0),
                    ..Default::default()
                }),
            FieldSpec::new("threshold", FieldType::Float).with_default(json!(0.3)),
            FieldSpec::new(
                "sink",
                FieldType::Enum {
                    variants: vec!["tracker".into(), "chat".into()],
                },
            ),
            FieldSpec::new(
                "files",
                FieldType::List {
                    item: Box::new(FieldType::String),
                },
            ),
        ])
    }

    #[test]
    fn test_valid_object_passes_and_defaults_applied() {
        let value = json!({"repo": "o/r", "pr_number": 42});
        let out = schema().validate(&value, "inputs").unwrap();
        assert_eq!(out["threshold"], json!(0.3));
        assert_eq!(out["repo"], json!("o/r"));
    }

    #[test]
    fn test_missing_required_is_invalid_input() {
        let err = schema().validate(&json!({"repo": "o/r"}), "inputs").unwrap_err();
        assert_eq!(err.code(), "APR-020");
        assert!(err.to_string().contains("inputs.pr_number"));
    }

    #[test]
    fn test_wrong_type_is_schema_mismatch() {
        let err = schema()
            .validate(&json!({"repo": 5, "pr_number": 42}), "inputs")
            .unwrap_err();
        assert_eq!(err.code(), "APR-021");
    }

    #[test]
    fn test_range_constraint() {
        let err = schema()
            .validate(&json!({"repo": "o/r", "pr_number": 0}), "inputs")
            .unwrap_err();
        assert_eq!(err.code(), "APR-020");
    }

    #[test]
    fn test_enum_rejects_unknown_variant() {
        let err = schema()
            .validate(
                &json!({"repo": "o/r", "pr_number": 1, "sink": "pager"}),
                "inputs",
            )
            .unwrap_err();
        assert_eq!(err.code(), "APR-020");
    }

    #[test]
    fn test_list_items_checked() {
        let err = schema()
            .validate(
                &json!({"repo": "o/r", "pr_number": 1, "files": ["a.ts", 7]}),
                "inputs",
            )
            .unwrap_err();
        assert!(err.to_string().contains("files[1]"));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = schema().validate(&json!([1, 2]), "inputs").unwrap_err();
        assert_eq!(err.code(), "APR-021");
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let value = json!({"repo": "o/r", "pr_number": 1, "extra": true});
        let out = schema().validate(&value, "inputs").unwrap();
        assert_eq!(out["extra"], json!(true));
    }

    #[test]
    fn test_nested_struct() {
        let schema = Schema::new(vec![FieldSpec::new(
            "meta",
            FieldType::Struct {
                fields: vec![FieldSpec::new("actor", FieldType::String).required()],
            },
        )
        .required()]);
        assert!(schema
            .validate(&json!({"meta": {"actor": "octocat"}}), "inputs")
            .is_ok());
        let err = schema
            .validate(&json!({"meta": {}}), "inputs")
            .unwrap_err();
        assert!(err.to_string().contains("inputs.meta.actor"));
    }
}
