//! JSON-facing data model: rules, components, request/response templates,
//! and the suspend checkpoint shape.
//!
//! Field names follow the wire contract in the design document, not Rust
//! naming conventions where the two disagree (`serde(rename_all)` closes
//! the gap).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A rule document: validation schema, component matrix, response template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub version: String,
    #[serde(default)]
    pub record: bool,
    #[serde(default)]
    pub suspend: bool,
    pub request: RequestSchema,
    pub response: ResponseTemplate,
    /// Row-major component matrix: `components[step][action]`.
    pub components: Vec<Vec<Component>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSchema {
    #[serde(rename = "type", default = "default_body_type")]
    pub body_type: String,
    #[serde(default)]
    pub query: HashMap<String, FieldRule>,
    #[serde(default)]
    pub body: HashMap<String, FieldRule>,
    #[serde(default)]
    pub header: HashMap<String, FieldRule>,
}

fn default_body_type() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTemplate {
    #[serde(rename = "type", default = "default_body_type")]
    pub body_type: String,
    #[serde(default)]
    pub body: HashMap<String, Value>,
    #[serde(default)]
    pub header: HashMap<String, Value>,
    #[serde(default, rename = "defaultBody")]
    pub default_body: HashMap<String, Value>,
}

/// Field type tags for recursive request validation. See `validation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    String,
    Bool,
    Slice,
    #[serde(rename = "object")]
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default, rename = "maxLen")]
    pub max_len: Option<usize>,
    #[serde(default, rename = "minLen")]
    pub min_len: Option<usize>,
    #[serde(default)]
    pub max: Option<Value>,
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub r#enum: Vec<Value>,
    #[serde(default)]
    pub attribute: HashMap<String, FieldRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Api,
    Script,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsRef {
    #[serde(default)]
    pub ca_ref: Option<String>,
    #[serde(default)]
    pub key_ref: Option<String>,
}

/// One cell in the component matrix.
///
/// `is_finish` is a resume-only marker: never present in an authored rule,
/// only set by [`crate::runner`] when reconstructing a run from a
/// [`SuspendCheckpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub input: HashMap<String, Value>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "outputName", default)]
    pub output_name: String,
    #[serde(rename = "isCache", default)]
    pub is_cache: bool,
    #[serde(default)]
    pub timeout_s: u64,
    #[serde(default)]
    pub retry_max_count: u32,
    #[serde(default)]
    pub retry_max_wait_s: u64,
    #[serde(default, rename = "nowResponse")]
    pub now_response: bool,
    #[serde(default, rename = "ignoreError")]
    pub ignore_error: bool,
    #[serde(default, skip_serializing)]
    pub is_finish: bool,

    // api-only fields
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub auth: Vec<Value>,
    #[serde(default)]
    pub header: HashMap<String, Value>,
    #[serde(default, rename = "dataType")]
    pub data_type: Option<String>,
    #[serde(default, rename = "responseType")]
    pub response_type: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsRef>,
    #[serde(default, rename = "responseCondition")]
    pub response_condition: Option<String>,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: Option<String>,
}

impl Component {
    pub fn clamped_timeout_secs(&self) -> u64 {
        if self.timeout_s == 0 || self.timeout_s > 60 {
            60
        } else {
            self.timeout_s
        }
    }

    pub fn clamped_retry_max_count(&self) -> u32 {
        if self.retry_max_count == 0 {
            0
        } else {
            self.retry_max_count.min(5)
        }
    }
}

// ---------------------------------------------------------------------
// RunLog / StepLog / ComponentLog
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RunStatus {
    Success,
    ActiveBreak,
    ErrorBreak,
    ActiveSuspend,
    ErrorSuspend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSubRequestLog {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_body: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentLog {
    pub step: usize,
    pub action: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sub_http_requests: Vec<HttpSubRequestLog>,
    pub start: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub step: usize,
    pub action_count: usize,
    #[serde(default)]
    pub components: Vec<ComponentLog>,
    #[serde(default)]
    pub error: Option<String>,
    pub start: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub trx: String,
    pub log_id: String,
    pub version: String,
    pub method: String,
    pub path: String,
    pub step_count: usize,
    pub current_step: usize,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub start: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub steps: Vec<StepLog>,
}

// ---------------------------------------------------------------------
// Suspend / resume
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendCheckpoint {
    pub trx: String,
    pub log_id: String,
    pub method: String,
    pub path: String,
    pub version: String,
    pub step_count: usize,
    /// 1-based: the first step that failed.
    pub current_step: usize,
    pub err_code: String,
    pub err_msg: String,
    /// Opaque JSON of the rule as seen at execution.
    pub rule_snapshot: String,
    /// Opaque JSON snapshot of the RunStore.
    pub data_snapshot: String,
    /// Names of components in `current_step` whose ComponentLog carried a
    /// non-empty error.
    pub failed_component_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_clamps_timeout_to_60() {
        let mut c = sample_component();
        c.timeout_s = 500;
        assert_eq!(c.clamped_timeout_secs(), 60);
        c.timeout_s = 0;
        assert_eq!(c.clamped_timeout_secs(), 60);
        c.timeout_s = 10;
        assert_eq!(c.clamped_timeout_secs(), 10);
    }

    #[test]
    fn component_clamps_retry_to_5() {
        let mut c = sample_component();
        c.retry_max_count = 99;
        assert_eq!(c.clamped_retry_max_count(), 5);
        c.retry_max_count = 2;
        assert_eq!(c.clamped_retry_max_count(), 2);
    }

    #[test]
    fn rule_round_trips_through_json() {
        let json = serde_json::json!({
            "version": "1",
            "record": true,
            "suspend": false,
            "request": {"type": "json"},
            "response": {"type": "json", "body": {"msg": "{echo.msg}"}},
            "components": [[{
                "name": "echo",
                "type": "api",
                "url": "http://svc/echo",
                "outputName": "echo",
                "method": "GET"
            }]]
        });
        let rule: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(rule.components.len(), 1);
        assert_eq!(rule.components[0][0].name, "echo");
        assert_eq!(rule.components[0][0].component_type, ComponentType::Api);
    }

    fn sample_component() -> Component {
        Component {
            name: "c".into(),
            description: String::new(),
            component_type: ComponentType::Api,
            input: HashMap::new(),
            condition: None,
            url: String::new(),
            output_name: "c".into(),
            is_cache: false,
            timeout_s: 0,
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
}
