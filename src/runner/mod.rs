//! Top-level run orchestrator: row-by-row scheduling, suspend/resume.
//!
//! Grounded on `engine/runner.go`'s `Run`/`RunComponent`/`WaitResponse`/
//! `WaitError`/`Suspend`/`SetStatus`/`SaveLog`, realized with the teacher's
//! `Semaphore`+`JoinSet` row-barrier dispatch shape instead of hand-rolled
//! `sync.WaitGroup` bookkeeping: each step row becomes one `JoinSet`, and
//! joining it *is* the barrier — a skipped (`is_finish`) component simply
//! never gets spawned, so the barrier completes without it, the same
//! "decrement the WaitGroup without running" effect the original gets from
//! calling `wg.Done()` immediately.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::cache::RequestCache;
use crate::channels::{ErrorChannel, ResponseChannel, ResponseData};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::external::ScriptStore;
use crate::log::LogRecorder;
use crate::model::{Rule, RunLog, RunStatus, SuspendCheckpoint};
use crate::runtime::{Runtime, RuntimeOutcome};
use crate::store::RunStore;

pub struct RunOutcome {
    pub run_log: RunLog,
    pub response_body: serde_json::Value,
    pub suspend: Option<SuspendCheckpoint>,
}

pub struct Runner {
    config: Arc<EngineConfig>,
    store: Arc<RunStore>,
    cache: Arc<RequestCache>,
    http_client: reqwest::Client,
    script_store: Option<Arc<dyn ScriptStore>>,
    trx: String,
    log_id: String,
    method: String,
    path: String,
    response: ResponseChannel,
    errors: ErrorChannel,
    recorder: Arc<LogRecorder>,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<RunStore>,
        cache: Arc<RequestCache>,
        http_client: reqwest::Client,
        script_store: Option<Arc<dyn ScriptStore>>,
        trx: String,
        log_id: String,
        method: String,
        path: String,
    ) -> Self {
        let rule_version = String::new();
        Self {
            recorder: Arc::new(LogRecorder::new(trx.clone(), log_id.clone(), rule_version, method.clone(), path.clone(), 0)),
            config,
            store,
            cache,
            http_client,
            script_store,
            trx,
            log_id,
            method,
            path,
            response: ResponseChannel::new(),
            errors: ErrorChannel::new(),
        }
    }

    #[instrument(skip(self, rule), fields(trx = %self.trx, method = %self.method, path = %self.path))]
    pub async fn run(&self, rule: &Rule) -> RunOutcome {
        self.recorder.set_request(self.store.get("request").await.unwrap_or(serde_json::Value::Null)).await;

        let response_watcher = {
            let response = self.response.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Some(data) = response.wait().await {
                    store
                        .set("response", serde_json::json!({"body": {"code": data.code, "msg": data.msg, "data": data.data}}))
                        .await;
                }
            })
        };

        let mut index = 0usize;
        let count = rule.components.len();
        let mut failed_component_names: Vec<String> = Vec::new();
        let mut failing_step = 0usize;

        while index < count {
            let row = &rule.components[index];
            let step = index + 1;
            if row.is_empty() {
                index += 1;
                continue;
            }

            self.recorder.begin_step(step, row.len()).await;
            let mut join_set = JoinSet::new();

            for (action, component) in row.iter().enumerate() {
                if component.is_finish {
                    continue;
                }
                let runtime = Runtime::new(
                    self.config.clone(),
                    self.store.clone(),
                    self.cache.clone(),
                    self.http_client.clone(),
                    self.script_store.clone(),
                    self.trx.clone(),
                    self.log_id.clone(),
                    self.response.clone(),
                    self.errors.clone(),
                );
                let component = component.clone();
                join_set.spawn(async move { runtime.run(&component, step, action).await });
            }

            let mut step_error = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((outcome, log)) => {
                        if matches!(outcome, RuntimeOutcome::Failed) {
                            step_error = log.error.clone();
                            failed_component_names.push(log.name.clone());
                        }
                        self.recorder.record_component(step, log).await;
                    }
                    Err(join_err) => {
                        step_error = Some(format!("component task panicked: {join_err}"));
                    }
                }
            }
            self.recorder.end_step(step, step_error).await;

            if self.errors.is_closed() {
                failing_step = step;
                break;
            }
            index += 1;
        }

        let error = self.errors.wait_if_closed().await;
        let outcome = if let Some(err) = error {
            self.finalize_failure(rule, err, failing_step, failed_component_names).await
        } else {
            self.finalize_success(rule).await
        };

        response_watcher.abort();
        outcome
    }

    async fn finalize_success(&self, rule: &Rule) -> RunOutcome {
        self.recorder.set_status(RunStatus::Success).await;
        let body = self.resolve_response_body(rule).await;
        self.recorder.set_response(body.clone()).await;
        let run_log = self.recorder.finish().await;

        if !self.response.is_closed() {
            self.response
                .deliver_and_close(ResponseData { code: 0, msg: String::new(), data: body.clone() })
                .await;
        }

        RunOutcome { run_log, response_body: body, suspend: None }
    }

    async fn finalize_failure(&self, rule: &Rule, err: EngineError, failing_step: usize, failed_component_names: Vec<String>) -> RunOutcome {
        let status = if err.is_break() {
            match err {
                EngineError::ActiveBreak(_) => RunStatus::ActiveBreak,
                _ => RunStatus::ErrorBreak,
            }
        } else if rule.suspend && err.is_suspendable() {
            match err {
                EngineError::ActiveSuspend { .. } => RunStatus::ActiveSuspend,
                _ => RunStatus::ErrorSuspend,
            }
        } else {
            RunStatus::ErrorBreak
        };

        self.recorder.set_status(status).await;
        self.recorder.set_error(err.message()).await;

        let mut suspend = None;
        if rule.suspend && err.is_suspendable() {
            let data_snapshot = serde_json::to_string(&self.store.snapshot().await).unwrap_or_default();
            let rule_snapshot = serde_json::to_string(rule).unwrap_or_default();
            suspend = Some(SuspendCheckpoint {
                trx: self.trx.clone(),
                log_id: self.log_id.clone(),
                method: self.method.clone(),
                path: self.path.clone(),
                version: rule.version.clone(),
                step_count: rule.components.len(),
                current_step: failing_step,
                err_code: err.code(),
                err_msg: err.message(),
                rule_snapshot,
                data_snapshot,
                failed_component_names,
            });
        }

        let run_log = self.recorder.finish().await;

        let body = if !self.response.is_closed() {
            let envelope = serde_json::json!({"code": err.code(), "msg": err.message()});
            self.response
                .deliver_and_close(ResponseData { code: -1, msg: err.message(), data: serde_json::Value::Null })
                .await;
            envelope
        } else {
            serde_json::Value::Null
        };

        RunOutcome { run_log, response_body: body, suspend }
    }

    async fn resolve_response_body(&self, rule: &Rule) -> serde_json::Value {
        let template = serde_json::to_value(&rule.response.body).unwrap_or(serde_json::Value::Null);
        let resolved = self.store.resolve_template(&template).await;
        if resolved.is_null() && !rule.response.default_body.is_empty() {
            serde_json::to_value(&rule.response.default_body).unwrap_or(serde_json::Value::Null)
        } else {
            resolved
        }
    }

    /// Rebuilds a Runner from a suspend checkpoint and a caller-supplied
    /// data overlay, marking every already-succeeded component in the
    /// failing step `is_finish` so the row is re-entered but only the
    /// previously-failed actions actually run.
    pub fn prime_resume(mut rule: Rule, checkpoint: &SuspendCheckpoint) -> Rule {
        if checkpoint.current_step == 0 || checkpoint.current_step > rule.components.len() {
            return rule;
        }
        let row = &mut rule.components[checkpoint.current_step - 1];
        for component in row.iter_mut() {
            if !checkpoint.failed_component_names.contains(&component.name) {
                component.is_finish = true;
            }
        }
        rule
    }
}

impl ErrorChannel {
    /// Non-blocking read used at the end of scheduling: returns the
    /// delivered error only if the channel is already closed, never waits.
    pub async fn wait_if_closed(&self) -> Option<EngineError> {
        if self.is_closed() {
            self.wait().await
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, ComponentType, RequestSchema, ResponseTemplate};
    use serde_json::json;
    use std::collections::HashMap;

    fn echo_component(name: &str, output_name: &str) -> Component {
        Component {
            name: name.to_string(),
            description: String::new(),
            component_type: ComponentType::Script,
            input: HashMap::new(),
            condition: None,
            url: String::new(),
            output_name: output_name.to_string(),
            is_cache: false,
            timeout_s: 5,
            retry_max_count: 0,
            retry_max_wait_s: 0,
            now_response: false,
            ignore_error: false,
            is_finish: false,
            method: None,
            content_type: None,
            auth: vec![],
            header: HashMap::new(),
            data_type: None,
            response_type: None,
            tls: None,
            response_condition: None,
            error_msg: None,
        }
    }

    fn empty_rule(components: Vec<Vec<Component>>) -> Rule {
        Rule {
            version: "1".to_string(),
            record: true,
            suspend: false,
            request: RequestSchema::default(),
            response: ResponseTemplate { body_type: "json".to_string(), body: HashMap::new(), header: HashMap::new(), default_body: HashMap::new() },
            components,
        }
    }

    #[tokio::test]
    async fn single_row_with_no_components_runs_and_succeeds() {
        let runner = Runner::new(
            Arc::new(EngineConfig::default()),
            Arc::new(RunStore::new()),
            Arc::new(RequestCache::default()),
            reqwest::Client::new(),
            None,
            "trx-1".into(),
            "log-1".into(),
            "POST".into(),
            "/svc/x".into(),
        );
        let rule = empty_rule(vec![vec![]]);
        let outcome = runner.run(&rule).await;
        assert_eq!(outcome.run_log.status, Some(RunStatus::Success));
    }

    #[test]
    fn prime_resume_marks_succeeded_components_as_finish() {
        let rule = empty_rule(vec![vec![echo_component("a", "a"), echo_component("b", "b")]]);
        let checkpoint = SuspendCheckpoint {
            trx: "t".into(),
            log_id: "l".into(),
            method: "POST".into(),
            path: "/x".into(),
            version: "1".into(),
            step_count: 1,
            current_step: 1,
            err_code: "E1".into(),
            err_msg: "m".into(),
            rule_snapshot: String::new(),
            data_snapshot: String::new(),
            failed_component_names: vec!["b".to_string()],
        };
        let primed = Runner::prime_resume(rule, &checkpoint);
        assert!(primed.components[0][0].is_finish);
        assert!(!primed.components[0][1].is_finish);
    }

    #[test]
    fn echo_component_helper_produces_valid_json() {
        let c = echo_component("x", "x");
        assert_eq!(serde_json::to_value(&c).unwrap()["name"], json!("x"));
    }
}
