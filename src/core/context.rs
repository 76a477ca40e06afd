//! Context carried by a machine instance.
//!
//! A context is a JSON object that travels with every [`State`](super::State).
//! Each state owns its own snapshot; transitions work on a copy and the
//! result becomes the context of the next state.
//!
//! Persistence stores contexts incrementally: the first event of an instance
//! carries the full object, every later event only a [`ContextDelta`]. Deltas
//! merge objects key by key and replace arrays wholesale.

use super::schema::{Schema, SchemaViolation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Keyed value store attached to a machine instance.
///
/// Keys are top-level object keys. Read accessors also accept dotted paths
/// (`"address.city"`) to reach into nested objects.
///
/// # Example
///
/// ```rust
/// use eventchart::core::ContextManager;
///
/// let mut context = ContextManager::new();
/// context.set("count", 1);
/// context.set("user", serde_json::json!({ "name": "ada" }));
///
/// assert!(context.has("count"));
/// assert_eq!(context.get_as::<i64>("count"), Some(1));
/// assert_eq!(context.get_as::<String>("user.name"), Some("ada".to_string()));
///
/// context.remove("count");
/// assert!(!context.has("count"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ContextManager {
    data: Map<String, Value>,
    schema: Option<Arc<Schema>>,
}

impl PartialEq for ContextManager {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl ContextManager {
    /// Create an empty context without a schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from an existing object.
    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data, schema: None }
    }

    /// Attach a schema used by [`validate`](Self::validate).
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_deref()
    }

    /// Look up a key, falling back to a dotted path into nested objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.data.get(key) {
            return Some(value);
        }
        let mut segments = key.split('.');
        let mut current = self.data.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a key and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a top-level key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Remove a top-level key, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Check the context against its schema, if any.
    ///
    /// Every violation is reported, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<SchemaViolation>> {
        match &self.schema {
            Some(schema) => schema.validate(&self.data),
            None => Ok(()),
        }
    }

    /// Compute the delta that turns `self` into `newer`.
    pub fn diff(&self, newer: &ContextManager) -> ContextDelta {
        ContextDelta::between(&self.data, &newer.data)
    }

    /// Apply a delta in place.
    pub fn apply(&mut self, delta: &ContextDelta) {
        delta.apply_to(&mut self.data);
    }
}

/// Incremental change between two context snapshots.
///
/// `changed` holds only the keys whose values differ, recursively for
/// nested objects. `removed` lists key paths that disappeared.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDelta {
    pub changed: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<Vec<String>>,
}

impl ContextDelta {
    /// Diff two context objects.
    ///
    /// # Example
    ///
    /// ```rust
    /// use eventchart::core::ContextDelta;
    /// use serde_json::json;
    ///
    /// let old = json!({ "user": { "name": "ada", "age": 36 }, "tags": ["a"] });
    /// let new = json!({ "user": { "name": "ada", "age": 37 }, "tags": ["a", "b"] });
    ///
    /// let delta = ContextDelta::between(
    ///     old.as_object().unwrap(),
    ///     new.as_object().unwrap(),
    /// );
    ///
    /// assert_eq!(
    ///     serde_json::Value::Object(delta.changed),
    ///     json!({ "user": { "age": 37 }, "tags": ["a", "b"] })
    /// );
    /// ```
    pub fn between(old: &Map<String, Value>, new: &Map<String, Value>) -> Self {
        let mut removed = Vec::new();
        let changed = diff_maps(old, new, &mut Vec::new(), &mut removed);
        Self { changed, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Merge this delta into `target`.
    pub fn apply_to(&self, target: &mut Map<String, Value>) {
        deep_merge(target, &self.changed);
        for path in &self.removed {
            remove_path(target, path);
        }
    }
}

/// Merge `changes` into `target`: objects merge key by key, everything else
/// (arrays included) replaces the previous value.
pub fn deep_merge(target: &mut Map<String, Value>, changes: &Map<String, Value>) {
    for (key, incoming) in changes {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => deep_merge(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn diff_maps(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &mut Vec<String>,
    removed: &mut Vec<Vec<String>>,
) -> Map<String, Value> {
    let mut changed = Map::new();

    for (key, new_value) in new {
        match (old.get(key), new_value) {
            (Some(Value::Object(old_object)), Value::Object(new_object)) => {
                path.push(key.clone());
                let nested = diff_maps(old_object, new_object, path, removed);
                path.pop();
                if !nested.is_empty() {
                    changed.insert(key.clone(), Value::Object(nested));
                }
            }
            (Some(old_value), _) if old_value == new_value => {}
            _ => {
                changed.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            let mut gone = path.clone();
            gone.push(key.clone());
            removed.push(gone);
        }
    }

    changed
}

fn remove_path(target: &mut Map<String, Value>, path: &[String]) {
    match path {
        [] => {}
        [last] => {
            target.remove(last);
        }
        [head, rest @ ..] => {
            if let Some(Value::Object(nested)) = target.get_mut(head) {
                remove_path(nested, rest);
            }
        }
    }
}
