//! Builds and executes outbound HTTP requests for `api` components and the
//! ScriptHost `request()` builtin.
//!
//! Grounded on the teacher's `executors/http.rs` for request assembly and
//! JSON-recursive interpolation, and on `engine/http.go`'s `HttpRequest.Do`
//! for defaulting (method uppercased, 60s timeout, `application/json`
//! content type, json response decoding) and its basic-auth/header
//! handling. XML request bodies and responses use the synthetic-root
//! wrapper convention from `tools/xml.go`'s `ToXmlString`/`XmlToAny`: the
//! JSON value is wrapped under one root element name on the way out, and a
//! single-key top-level map is unwrapped back to its inner value on the
//! way in.

mod xml;

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::EngineError;

pub use xml::{value_to_xml, xml_to_value};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONTENT_TYPE: &str = "application/json";
const XML_ROOT: &str = "xml";

/// Everything needed to perform one outbound call, already
/// template-resolved by the caller (Runtime or ScriptHost).
#[derive(Debug, Clone)]
pub struct ApiRequestSpec {
    pub url: String,
    pub method: String,
    pub header: HashMap<String, Value>,
    /// `[username, password]` if Basic auth applies, else empty.
    pub auth: Vec<Value>,
    pub body: Value,
    pub content_type: String,
    pub timeout: Duration,
    /// `json` | `xml` | `form`: how `body` is encoded onto the wire. `form`
    /// serializes `body`'s top-level fields as a URL-encoded query string
    /// instead of a request body, matching the original's GET handling.
    pub data_type: String,
    /// `json` | `xml` | `text`.
    pub response_type: String,
}

impl Default for ApiRequestSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            header: HashMap::new(),
            auth: Vec::new(),
            body: Value::Null,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            data_type: "json".to_string(),
            response_type: "json".to_string(),
        }
    }
}

impl ApiRequestSpec {
    /// Applies the original's defaulting rules to a partially-populated spec.
    pub fn normalize(mut self) -> Result<Self, EngineError> {
        if self.url.trim().is_empty() {
            return Err(EngineError::Request("url is empty".to_string()));
        }
        if self.method.trim().is_empty() {
            self.method = "GET".to_string();
        }
        self.method = self.method.to_uppercase();
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        }
        if self.content_type.trim().is_empty() {
            self.content_type = DEFAULT_CONTENT_TYPE.to_string();
        }
        if self.data_type.trim().is_empty() {
            self.data_type = "json".to_string();
        }
        if self.response_type.trim().is_empty() {
            self.response_type = "json".to_string();
        }
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub header: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Value,
}

/// Performs one HTTP call and decodes the response according to
/// `response_type`.
pub async fn execute(client: &reqwest::Client, spec: &ApiRequestSpec) -> Result<ApiResponse, EngineError> {
    let spec = spec.clone().normalize()?;

    let method = reqwest::Method::from_bytes(spec.method.as_bytes())
        .map_err(|e| EngineError::Request(format!("invalid method {}: {e}", spec.method)))?;

    let mut builder = client
        .request(method, &spec.url)
        .timeout(spec.timeout)
        .header(reqwest::header::CONTENT_TYPE, &spec.content_type);

    for (k, v) in &spec.header {
        let value = value_to_header_string(v);
        builder = builder.header(k, value);
    }

    if spec.auth.len() == 2 {
        let user = spec.auth[0].as_str().unwrap_or_default();
        let pass = spec.auth[1].as_str().unwrap_or_default();
        builder = builder.basic_auth(user, Some(pass));
    }

    if !spec.body.is_null() {
        if spec.data_type == "form" || spec.method == "GET" {
            builder = builder.query(&object_to_pairs(&spec.body));
        } else if spec.data_type == "xml" || spec.content_type.contains("xml") {
            builder = builder.body(value_to_xml(&spec.body, XML_ROOT));
        } else {
            builder = builder.body(spec.body.to_string());
        }
    }

    let response = builder
        .send()
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let header = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let cookies = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(parse_cookie_pair)
        .collect();
    let text = response
        .text()
        .await
        .map_err(|e| EngineError::Network(e.to_string()))?;

    let body = decode_body(&text, &spec.response_type)?;

    Ok(ApiResponse { status, header, cookies, body })
}

/// Flattens a JSON object's top-level fields into `(key, value)` string
/// pairs for form/query encoding. Non-object bodies yield no pairs.
fn object_to_pairs(body: &Value) -> Vec<(String, String)> {
    match body.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), value_to_header_string(v)))
            .collect(),
        None => Vec::new(),
    }
}

/// Parses one `Set-Cookie` header value into its `(name, value)` pair,
/// discarding attributes (`Path`, `Expires`, ...).
fn parse_cookie_pair(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}

fn decode_body(text: &str, response_type: &str) -> Result<Value, EngineError> {
    match response_type {
        "json" => {
            if text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                serde_json::from_str(text).map_err(|e| EngineError::Request(format!("invalid json response: {e}")))
            }
        }
        "xml" => xml_to_value(text),
        "text" => Ok(Value::String(text.to_string())),
        other => Err(EngineError::Request(format!("unsupported response type: {other}"))),
    }
}

fn value_to_header_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_defaults_empty_fields() {
        let spec = ApiRequestSpec {
            url: "http://example.test".to_string(),
            method: String::new(),
            content_type: String::new(),
            response_type: String::new(),
            timeout: Duration::ZERO,
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(spec.method, "GET");
        assert_eq!(spec.content_type, "application/json");
        assert_eq!(spec.response_type, "json");
        assert_eq!(spec.timeout, Duration::from_secs(60));
    }

    #[test]
    fn normalize_rejects_empty_url() {
        let spec = ApiRequestSpec::default();
        assert!(spec.normalize().is_err());
    }

    #[test]
    fn decode_body_json() {
        let v = decode_body(r#"{"a":1}"#, "json").unwrap();
        assert_eq!(v, serde_json::json!({"a": 1}));
    }

    #[test]
    fn decode_body_text() {
        let v = decode_body("hello", "text").unwrap();
        assert_eq!(v, Value::String("hello".to_string()));
    }
}
