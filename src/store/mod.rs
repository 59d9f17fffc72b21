//! The per-run data tree: every component's output lands here under its
//! `output_name`, and every later component's `input`/`header`/`url` can
//! reference any prior value with a `{dotted.path}` placeholder.
//!
//! Grounded on the Go original's `runStore` (`GetData`/`SetData`/
//! `GetMatchData`): a flat top-level map whose values are walked by
//! dot-splitting the key, generalized from the teacher's single-level
//! `Context` map.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Matches a single `{a.b.c}` placeholder anywhere inside a string.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([\w.]+)\}").expect("static regex is valid"));

/// Thread-safe nested JSON value tree keyed by top-level name.
///
/// Reads (`get`/`resolve_template`) vastly outnumber writes (one `set` per
/// finished component), so an `RwLock` favors concurrent readers the same
/// way the Go original's `sync.RWMutex` does.
pub struct RunStore {
    data: RwLock<HashMap<String, Value>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn seeded(initial: HashMap<String, Value>) -> Self {
        Self {
            data: RwLock::new(initial),
        }
    }

    /// Assigns `value` under the top-level key `name`, replacing whatever
    /// was there. Duplicate `output_name`s within one row are last-writer-wins,
    /// matching both source trees.
    pub async fn set(&self, name: &str, value: Value) {
        self.data.write().await.insert(name.to_string(), value);
    }

    /// Resolves a dotted path like `echo.body.id` by walking the top-level
    /// value with each subsequent segment, descending into objects, arrays
    /// (numeric segments), and returning `None` on any missed step.
    pub async fn get(&self, path: &str) -> Option<Value> {
        let data = self.data.read().await;
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = data.get(root)?.clone();
        for segment in segments {
            current = descend(&current, segment)?;
        }
        Some(current)
    }

    /// Snapshot of the whole tree, used for suspend checkpoints and the
    /// final response template resolution.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.data.read().await.clone()
    }

    pub async fn restore(&self, snapshot: HashMap<String, Value>) {
        *self.data.write().await = snapshot;
    }

    /// Walks `value`, replacing any string containing a `{path}` placeholder
    /// with the resolved value in full, preserving its type — surrounding
    /// text is discarded, matching the Go original's `GetMatchData`.
    /// Unresolvable placeholders are left verbatim.
    pub async fn resolve_template(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s).await,
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Box::pin(self.resolve_template(item)).await);
                }
                Value::Array(out)
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), Box::pin(self.resolve_template(v)).await);
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    async fn resolve_string(&self, s: &str) -> Value {
        match PLACEHOLDER.captures(s) {
            Some(caps) => {
                let path = &caps[1];
                self.get(path).await.unwrap_or_else(|| Value::String(s.to_string()))
            }
            None => Value::String(s.to_string()),
        }
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

fn descend(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(segment).cloned(),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_nested_path() {
        let store = RunStore::new();
        store
            .set("echo", json!({"body": {"id": 42, "name": "a"}}))
            .await;
        assert_eq!(store.get("echo.body.id").await, Some(json!(42)));
        assert_eq!(store.get("echo.body.name").await, Some(json!("a")));
        assert_eq!(store.get("echo.missing").await, None);
    }

    #[tokio::test]
    async fn last_writer_wins_on_duplicate_output_name() {
        let store = RunStore::new();
        store.set("x", json!(1)).await;
        store.set("x", json!(2)).await;
        assert_eq!(store.get("x").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn whole_string_placeholder_preserves_type() {
        let store = RunStore::new();
        store.set("echo", json!({"body": {"id": 42}})).await;
        let resolved = store.resolve_template(&json!("{echo.body.id}")).await;
        assert_eq!(resolved, json!(42));
    }

    #[tokio::test]
    async fn embedded_placeholder_replaces_whole_string() {
        let store = RunStore::new();
        store.set("echo", json!({"body": {"id": 42}})).await;
        let resolved = store
            .resolve_template(&json!("user-{echo.body.id}-done"))
            .await;
        assert_eq!(resolved, json!(42));
    }

    #[tokio::test]
    async fn unresolvable_placeholder_left_verbatim() {
        let store = RunStore::new();
        let resolved = store.resolve_template(&json!("{nope.nope}")).await;
        assert_eq!(resolved, json!("{nope.nope}"));
    }

    #[tokio::test]
    async fn resolves_through_nested_objects_and_arrays() {
        let store = RunStore::new();
        store
            .set(
                "page",
                json!({"title": "hi", "items": [{"name": "first"}, {"name": "second"}]}),
            )
            .await;
        let template = json!({"greeting": "{page.title}", "first_item": "{page.items.0.name}"});
        let resolved = store.resolve_template(&template).await;
        assert_eq!(
            resolved,
            json!({"greeting": "hi", "first_item": "first"})
        );
    }
}
