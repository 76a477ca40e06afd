//! Lightweight per-key type schemas for contexts and event payloads.
//!
//! Schemas are declared as a JSON object mapping keys to kind names, with a
//! trailing `?` for optional keys:
//!
//! ```json
//! { "count": "integer", "note": "string?", "items": "array" }
//! ```
//!
//! Validation uses Stillwater's `Validation` so every violation is reported
//! in a single pass.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Kind of JSON value a key must hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ValueKind {
    /// Parse a kind name as written in a schema declaration.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "integer" | "int" => Some(Self::Integer),
            "number" | "float" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            "any" | "mixed" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("missing required key '{key}'")]
    Missing { key: String },

    #[error("key '{key}' must be {expected}, found {found}")]
    WrongKind {
        key: String,
        expected: ValueKind,
        found: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq)]
struct FieldRule {
    name: String,
    kind: ValueKind,
    optional: bool,
}

/// Ordered set of key rules.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldRule>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to be present with the given kind.
    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Allow `name` to be absent or null; when present it must match `kind`.
    pub fn optional(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Parse a declarative schema object.
    pub fn parse(declaration: &Value) -> Result<Self, String> {
        let Some(entries) = declaration.as_object() else {
            return Err("schema must be an object of key -> kind".to_string());
        };

        let mut schema = Schema::new();
        for (key, kind) in entries {
            let Some(declared) = kind.as_str() else {
                return Err(format!("kind for '{key}' must be a string"));
            };
            let (name, optional) = match declared.strip_suffix('?') {
                Some(name) => (name, true),
                None => (declared, false),
            };
            let kind = ValueKind::parse(name)
                .ok_or_else(|| format!("unknown kind '{name}' for '{key}'"))?;
            schema = if optional {
                schema.optional(key.clone(), kind)
            } else {
                schema.field(key.clone(), kind)
            };
        }
        Ok(schema)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check every rule, accumulating all violations.
    pub fn check(&self, data: &Map<String, Value>) -> Validation<(), NonEmptyVec<SchemaViolation>> {
        let checks: Vec<Validation<(), NonEmptyVec<SchemaViolation>>> = self
            .fields
            .iter()
            .map(|rule| match data.get(&rule.name) {
                None | Some(Value::Null) if rule.optional => Validation::success(()),
                None => Validation::fail(SchemaViolation::Missing {
                    key: rule.name.clone(),
                }),
                Some(value) if rule.kind.accepts(value) => Validation::success(()),
                Some(value) => Validation::fail(SchemaViolation::WrongKind {
                    key: rule.name.clone(),
                    expected: rule.kind,
                    found: kind_name(value),
                }),
            })
            .collect();

        Validation::all_vec(checks).map(|_| ())
    }

    /// [`check`](Self::check) flattened into a `Result`.
    pub fn validate(&self, data: &Map<String, Value>) -> Result<(), Vec<SchemaViolation>> {
        match self.check(data) {
            Validation::Success(_) => Ok(()),
            Validation::Failure(violations) => Err(violations.iter().cloned().collect()),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_reads_kinds_and_optional_marker() {
        let schema = Schema::parse(&json!({ "count": "integer", "note": "string?" })).unwrap();

        assert!(schema.validate(&map(json!({ "count": 1 }))).is_ok());
        assert!(schema
            .validate(&map(json!({ "count": 1, "note": null })))
            .is_ok());
        assert!(schema.validate(&map(json!({ "note": "x" }))).is_err());
    }

    #[test]
    fn parse_rejects_unknown_kinds() {
        let err = Schema::parse(&json!({ "count": "decimal" })).unwrap_err();
        assert!(err.contains("decimal"));
    }

    #[test]
    fn check_accumulates_all_violations() {
        let schema = Schema::new()
            .field("count", ValueKind::Integer)
            .field("name", ValueKind::String)
            .field("tags", ValueKind::Array);

        let violations = schema
            .validate(&map(json!({ "count": 1.5, "tags": {} })))
            .unwrap_err();

        assert_eq!(violations.len(), 3);
        assert!(violations.contains(&SchemaViolation::Missing {
            key: "name".into()
        }));
        assert!(violations.contains(&SchemaViolation::WrongKind {
            key: "count".into(),
            expected: ValueKind::Integer,
            found: "number",
        }));
    }

    #[test]
    fn number_accepts_integers() {
        let schema = Schema::new().field("amount", ValueKind::Number);
        assert!(schema.validate(&map(json!({ "amount": 3 }))).is_ok());
        assert!(schema.validate(&map(json!({ "amount": 3.5 }))).is_ok());
    }

    #[test]
    fn any_accepts_everything_but_absence() {
        let schema = Schema::new().field("blob", ValueKind::Any);
        assert!(schema.validate(&map(json!({ "blob": null }))).is_ok());
        assert!(schema.check(&map(json!({}))).is_failure());
    }
}
