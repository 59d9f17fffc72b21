//! Executes exactly one component: gate check, template resolution,
//! cache lookup, api/script dispatch, retry with backoff, output write.
//!
//! Directly grounded on `engine/runtime.go`'s `Run`/`runApi`/`runScript`/
//! `waitTime`. The backoff formula — `wait = (retry_max_wait/clamped_max) *
//! current_retry` below the retry ceiling, else `retry_max_wait` flat — is
//! carried verbatim from `waitTime` (line 165 of the original), not
//! replaced by the teacher's exponential `backoff_ms * factor^attempt`
//! formula; the teacher's retry control-flow *shape* (loop, sleep, retry
//! counter) is what's reused, not its numeric curve.

use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::cache::RequestCache;
use crate::channels::{ErrorChannel, ResponseChannel, ResponseData};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::external::ScriptStore;
use crate::http::{self, ApiRequestSpec};
use crate::log::ComponentLogBuilder;
use crate::model::{Component, ComponentType};
use crate::script::{Gate, ScriptHost, ScriptOutcome};
use crate::store::RunStore;

pub enum RuntimeOutcome {
    Skipped,
    Completed,
    /// The Runner's ErrorChannel has already been notified; whether this
    /// particular delivery "won" depends on whether another concurrent
    /// failure in the same row got there first.
    Failed,
}

pub struct Runtime {
    config: Arc<EngineConfig>,
    store: Arc<RunStore>,
    cache: Arc<RequestCache>,
    http_client: reqwest::Client,
    script_store: Option<Arc<dyn ScriptStore>>,
    trx: String,
    log_id: String,
    response: ResponseChannel,
    errors: ErrorChannel,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<RunStore>,
        cache: Arc<RequestCache>,
        http_client: reqwest::Client,
        script_store: Option<Arc<dyn ScriptStore>>,
        trx: String,
        log_id: String,
        response: ResponseChannel,
        errors: ErrorChannel,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            http_client,
            script_store,
            trx,
            log_id,
            response,
            errors,
        }
    }

    #[instrument(skip(self, component), fields(name = %component.name, step, action, r#type = ?component.component_type))]
    pub async fn run(&self, component: &Component, step: usize, action: usize) -> (RuntimeOutcome, crate::model::ComponentLog) {
        let admitted = Gate::evaluate(component.condition.as_deref(), &self.store).await;

        let admitted = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                let log = ComponentLogBuilder::new(step, action, component.name.clone(), component.component_type, serde_json::Value::Null)
                    .finish(None, Some(e.message()));
                self.errors.deliver_and_close(e).await;
                return (RuntimeOutcome::Failed, log);
            }
        };

        if !admitted {
            let builder = ComponentLogBuilder::new(step, action, component.name.clone(), component.component_type, serde_json::Value::Null);
            let log = builder.mark_skipped().finish(None, None);
            return (RuntimeOutcome::Skipped, log);
        }

        let input_template = serde_json::to_value(&component.input).unwrap_or(serde_json::Value::Null);
        let resolved_input = self.store.resolve_template(&input_template).await;

        let mut builder = ComponentLogBuilder::new(step, action, component.name.clone(), component.component_type, resolved_input.clone());

        let retry_max = component.clamped_retry_max_count();
        let retry_wait = if component.retry_max_wait_s == 0 { 10 } else { component.retry_max_wait_s };
        let timeout = self.config.clamp_timeout(Duration::from_secs(component.clamped_timeout_secs()));

        let mut current_retry = 0u32;
        loop {
            builder.set_retry_count(current_retry);
            let outcome = self.dispatch(component, &resolved_input, timeout).await;

            match outcome {
                Ok(output) => {
                    self.store.set(&component.output_name, output.clone()).await;

                    if component.now_response {
                        self.response
                            .deliver_and_close(ResponseData { code: 0, msg: String::new(), data: output.clone() })
                            .await;
                    }

                    let log = builder.finish(Some(output), None);
                    return (RuntimeOutcome::Completed, log);
                }
                Err(err) => {
                    if err.is_retriable() && current_retry < retry_max {
                        let wait = wait_time(current_retry, retry_max, retry_wait);
                        warn!(retry = current_retry, wait_secs = wait.as_secs(), "retrying component after error");
                        tokio::time::sleep(wait).await;
                        current_retry += 1;
                        continue;
                    }

                    let log = builder.finish(None, Some(err.message()));

                    if component.ignore_error {
                        return (RuntimeOutcome::Completed, log);
                    }

                    self.errors.deliver_and_close(err).await;
                    return (RuntimeOutcome::Failed, log);
                }
            }
        }
    }

    /// Cacheable components single-flight through `RequestCache`: concurrent
    /// callers racing for the same key block on one shared computation
    /// instead of each re-running the (possibly expensive) api/script
    /// dispatch, matching the distributed single-flight guarantee the
    /// original provides via its cache lock.
    async fn dispatch(&self, component: &Component, resolved_input: &serde_json::Value, timeout: Duration) -> Result<serde_json::Value, EngineError> {
        if component.is_cache {
            let key = RequestCache::key_for(&component.name, resolved_input);
            return self
                .cache
                .get_or_compute(&key, || self.execute(component, resolved_input, timeout))
                .await;
        }

        self.execute(component, resolved_input, timeout).await
    }

    async fn execute(&self, component: &Component, resolved_input: &serde_json::Value, timeout: Duration) -> Result<serde_json::Value, EngineError> {
        match component.component_type {
            ComponentType::Api => self.run_api(component, resolved_input, timeout).await,
            ComponentType::Script => self.run_script(component, resolved_input, timeout).await,
        }
    }

    async fn run_api(&self, component: &Component, resolved_input: &serde_json::Value, timeout: Duration) -> Result<serde_json::Value, EngineError> {
        let header_template = serde_json::to_value(&component.header).unwrap_or(serde_json::Value::Null);
        let header_resolved = self.store.resolve_template(&header_template).await;
        let header = header_resolved
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let url_value = self.store.resolve_template(&serde_json::Value::String(component.url.clone())).await;
        let url = url_value.as_str().unwrap_or(&component.url).to_string();

        let auth_template = serde_json::Value::Array(component.auth.clone());
        let auth_resolved = self.store.resolve_template(&auth_template).await;
        let auth = auth_resolved.as_array().cloned().unwrap_or_default();

        let spec = ApiRequestSpec {
            url,
            method: component.method.clone().unwrap_or_else(|| "GET".to_string()),
            header,
            auth,
            body: resolved_input.clone(),
            content_type: component.content_type.clone().unwrap_or_else(|| "application/json".to_string()),
            timeout,
            data_type: component.data_type.clone().unwrap_or_else(|| "json".to_string()),
            response_type: component.response_type.clone().unwrap_or_else(|| "json".to_string()),
        };

        let response = http::execute(&self.http_client, &spec).await?;
        Ok(response.body)
    }

    async fn run_script(&self, component: &Component, resolved_input: &serde_json::Value, timeout: Duration) -> Result<serde_json::Value, EngineError> {
        let script_store = self
            .script_store
            .as_ref()
            .ok_or_else(|| EngineError::ModuleArg("no script store configured".to_string()))?;
        let (script_text, _version) = script_store.load_script(&component.url).await?;

        let host = ScriptHost::new(
            self.store.clone(),
            self.trx.clone(),
            self.log_id.clone(),
            self.response.clone(),
            self.cache.clone(),
            self.http_client.clone(),
        );

        match host.run(&script_text, resolved_input.clone(), timeout).await? {
            ScriptOutcome::Value(v) => Ok(v),
            ScriptOutcome::Suspend { code, msg } => {
                if code.is_empty() {
                    Err(EngineError::ActiveSuspend { code: "110009".to_string(), msg })
                } else {
                    Err(EngineError::ActiveSuspend { code, msg })
                }
            }
            ScriptOutcome::Break { msg } => Err(EngineError::ActiveBreak(msg)),
        }
    }
}

/// Ported verbatim from `runtime.waitTime`: `wait` defaults to 10s when
/// zero, `max` clamps to `[0, 5]`, flat `wait` once `cur >= max`, otherwise
/// linearly scaled by `cur/max`.
fn wait_time(cur: u32, max: u32, wait_secs: u64) -> Duration {
    let max = max.min(5);
    if cur >= max {
        return Duration::from_secs(wait_secs);
    }
    let scaled = (wait_secs as f64 / max as f64) * cur as f64;
    Duration::from_secs_f64(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_is_flat_at_or_past_ceiling() {
        assert_eq!(wait_time(5, 5, 10), Duration::from_secs(10));
        assert_eq!(wait_time(9, 5, 10), Duration::from_secs(10));
    }

    #[test]
    fn wait_time_scales_linearly_below_ceiling() {
        assert_eq!(wait_time(0, 5, 10), Duration::from_secs(0));
        assert_eq!(wait_time(1, 5, 10), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn wait_time_clamps_max_above_5() {
        assert_eq!(wait_time(5, 50, 10), wait_time(5, 5, 10));
    }

    #[test]
    fn zero_wait_defaults_handled_by_caller() {
        // waitTime itself takes the already-defaulted `wait`; the
        // zero -> 10 default lives in `Runtime::run`.
        assert_eq!(wait_time(0, 1, 10), Duration::from_secs(0));
    }
}
