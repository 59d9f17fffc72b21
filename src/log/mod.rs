//! Hierarchical run log accumulator.
//!
//! Grounded on `engine/log.go`'s `runLog` → `stepLog` → `componentLog` →
//! `requestLog` nesting and its `SetRunTime` timing pattern; reworked onto
//! `chrono` timestamps and interior-mutable append calls instead of Go's
//! pointer-slice appends under an explicit mutex, since components within a
//! row append to the same `StepLog` concurrently.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::{ComponentLog, ComponentType, HttpSubRequestLog, RunLog, RunStatus, StepLog};

/// Accumulates one run's log tree across concurrent component executions.
pub struct LogRecorder {
    inner: RwLock<RunLog>,
}

impl LogRecorder {
    pub fn new(trx: String, log_id: String, version: String, method: String, path: String, step_count: usize) -> Self {
        Self {
            inner: RwLock::new(RunLog {
                trx,
                log_id,
                version,
                method,
                path,
                step_count,
                current_step: 0,
                status: None,
                request: Value::Null,
                response: None,
                error: None,
                start: Utc::now(),
                end: None,
                duration_ms: 0,
                steps: Vec::new(),
            }),
        }
    }

    pub async fn set_request(&self, request: Value) {
        self.inner.write().await.request = request;
    }

    /// Begins a new step row; `action_count` is the number of components in
    /// the row (including any skipped `is_finish` placeholders).
    pub async fn begin_step(&self, step: usize, action_count: usize) {
        let mut inner = self.inner.write().await;
        inner.current_step = step;
        inner.steps.push(StepLog {
            step,
            action_count,
            components: Vec::new(),
            error: None,
            start: Utc::now(),
            end: None,
            duration_ms: 0,
        });
    }

    pub async fn end_step(&self, step: usize, error: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.steps.iter_mut().find(|s| s.step == step) {
            let now = Utc::now();
            s.end = Some(now);
            s.duration_ms = (now - s.start).num_milliseconds();
            s.error = error;
        }
    }

    /// Appends a component's log to its step row. Safe to call
    /// concurrently from every component in the row.
    pub async fn record_component(&self, step: usize, log: ComponentLog) {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.steps.iter_mut().find(|s| s.step == step) {
            s.components.push(log);
        }
    }

    pub async fn set_status(&self, status: RunStatus) {
        self.inner.write().await.status = Some(status);
    }

    pub async fn set_error(&self, error: String) {
        self.inner.write().await.error = Some(error);
    }

    pub async fn set_response(&self, response: Value) {
        self.inner.write().await.response = Some(response);
    }

    /// Finalizes timing fields and returns the completed log.
    pub async fn finish(&self) -> RunLog {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.end = Some(now);
        inner.duration_ms = (now - inner.start).num_milliseconds();
        inner.clone()
    }

    pub async fn snapshot(&self) -> RunLog {
        self.inner.read().await.clone()
    }
}

/// Builder for one component's log entry, instantiated at the start of a
/// component run and finalized once the component settles.
pub struct ComponentLogBuilder {
    log: ComponentLog,
}

impl ComponentLogBuilder {
    pub fn new(step: usize, action: usize, name: String, component_type: ComponentType, input: Value) -> Self {
        Self {
            log: ComponentLog {
                step,
                action,
                name,
                component_type,
                retry_count: 0,
                skipped: false,
                input,
                output: None,
                error: None,
                sub_http_requests: Vec::new(),
                start: Utc::now(),
                end: None,
                duration_ms: 0,
            },
        }
    }

    pub fn mark_skipped(mut self) -> Self {
        self.log.skipped = true;
        self
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.log.retry_count = count;
    }

    pub fn push_sub_request(&mut self, sub: HttpSubRequestLog) {
        self.log.sub_http_requests.push(sub);
    }

    pub fn finish(mut self, output: Option<Value>, error: Option<String>) -> ComponentLog {
        let now = Utc::now();
        self.log.end = Some(now);
        self.log.duration_ms = (now - self.log.start).num_milliseconds();
        self.log.output = output;
        self.log.error = error;
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_a_step_with_one_component() {
        let recorder = LogRecorder::new(
            "trx-1".into(),
            "log-1".into(),
            "1".into(),
            "POST".into(),
            "/svc/run".into(),
            1,
        );
        recorder.begin_step(1, 1).await;

        let builder = ComponentLogBuilder::new(1, 0, "echo".into(), ComponentType::Api, json!({}));
        let component_log = builder.finish(Some(json!({"ok": true})), None);
        recorder.record_component(1, component_log).await;
        recorder.end_step(1, None).await;

        let run_log = recorder.finish().await;
        assert_eq!(run_log.steps.len(), 1);
        assert_eq!(run_log.steps[0].components.len(), 1);
        assert_eq!(run_log.steps[0].components[0].name, "echo");
    }

    #[tokio::test]
    async fn concurrent_components_in_same_row_all_recorded() {
        let recorder = std::sync::Arc::new(LogRecorder::new(
            "trx-1".into(),
            "log-1".into(),
            "1".into(),
            "POST".into(),
            "/svc/run".into(),
            1,
        ));
        recorder.begin_step(1, 4).await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                let builder = ComponentLogBuilder::new(1, i, format!("c{i}"), ComponentType::Api, json!({}));
                let log = builder.finish(Some(json!(i)), None);
                recorder.record_component(1, log).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = recorder.snapshot().await;
        assert_eq!(snapshot.steps[0].components.len(), 4);
    }
}
