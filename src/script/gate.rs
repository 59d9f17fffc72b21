//! Evaluates a component's admission predicate over a RunStore.
//!
//! Implements the algorithm from the design document literally: every
//! `{dotted.path}` occurrence in `condition` is resolved against the
//! RunStore and bound to a synthetic `a_<index>` variable in a fresh scope,
//! the occurrence is replaced by that name in the condition text, and the
//! rewritten expression is evaluated in an isolated engine instance. The
//! result must be a bool; anything else (eval error, non-bool) is a
//! condition error, which the caller treats as a broken component, not a
//! skip.

use once_cell::sync::Lazy;
use regex::Regex;
use rhai::{Engine, Scope};

use crate::errors::EngineError;
use crate::script::convert::json_to_dynamic;
use crate::store::RunStore;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([\w.]+)\}").expect("static regex is valid"));

pub struct Gate;

impl Gate {
    /// `None`/empty condition admits unconditionally.
    pub async fn evaluate(condition: Option<&str>, store: &RunStore) -> Result<bool, EngineError> {
        let condition = match condition {
            Some(c) if !c.trim().is_empty() => c,
            _ => return Ok(true),
        };

        let mut scope = Scope::new();
        let mut rewritten = String::with_capacity(condition.len());
        let mut last_end = 0;

        for (index, caps) in PLACEHOLDER.captures_iter(condition).enumerate() {
            let whole = caps.get(0).expect("group 0 always matches");
            let path = &caps[1];
            let binding = format!("a_{index}");

            rewritten.push_str(&condition[last_end..whole.start()]);
            rewritten.push_str(&binding);
            last_end = whole.end();

            let resolved = store.get(path).await;
            let dyn_value = match resolved {
                Some(value) => json_to_dynamic(&value),
                None => rhai::Dynamic::UNIT,
            };
            scope.push(binding, dyn_value);
        }
        rewritten.push_str(&condition[last_end..]);

        let engine = Engine::new();
        let result = engine
            .eval_with_scope::<bool>(&mut scope, &rewritten)
            .map_err(|e| EngineError::Condition(format!("{condition}: {e}")))?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn empty_condition_admits() {
        let store = RunStore::new();
        assert!(Gate::evaluate(None, &store).await.unwrap());
        assert!(Gate::evaluate(Some(""), &store).await.unwrap());
    }

    #[tokio::test]
    async fn resolves_placeholder_against_store() {
        let store = RunStore::new();
        store.set("flags", json!({"enable": true})).await;
        let admitted = Gate::evaluate(Some("{flags.enable} == true"), &store).await.unwrap();
        assert!(admitted);
    }

    #[tokio::test]
    async fn false_condition_denies() {
        let store = RunStore::new();
        store.set("flags", json!({"enable": false})).await;
        let admitted = Gate::evaluate(Some("{flags.enable}==true"), &store).await.unwrap();
        assert!(!admitted);
    }

    #[tokio::test]
    async fn non_boolean_result_is_a_condition_error() {
        let store = RunStore::new();
        store.set("n", json!(5)).await;
        let result = Gate::evaluate(Some("{n}"), &store).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unresolved_path_binds_as_unit() {
        let store = RunStore::new();
        let admitted = Gate::evaluate(Some("{nope.nope} == ()"), &store).await.unwrap();
        assert!(admitted);
    }
}
