//! Sandboxed script execution for `script`-type components.
//!
//! Grounded on `engine/module.go`'s `GetGlobalJsModule` (the `request`/
//! `log`/`data` module surface registered into a fresh `otto` VM per call)
//! and `engine/runtime.go::runScript` (load script text, build a VM, race
//! it against a timeout, call the conventional entry function, export the
//! return value). `suspend`/`break`/`response` there are Go panics with a
//! typed `*Error` payload, recovered and translated by status code; here
//! they are `rhai` `register_result_fn` callables that return a tagged
//! runtime error, unwound by rhai's normal error propagation and
//! pattern-matched after evaluation — same "throw becomes a typed signal"
//! contract, different unwinding mechanism.
//!
//! A fresh `Engine` is built per component invocation, never shared or
//! reused across components — the isolation the spec calls for.

pub mod convert;
pub mod gate;

pub use gate::Gate;

use rhai::{Dynamic, Engine, EvalAltResult, Map as RhaiMap, Scope};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::RequestCache;
use crate::channels::{ResponseChannel, ResponseData};
use crate::errors::EngineError;
use crate::http::{self, ApiRequestSpec};
use crate::store::RunStore;

use convert::{dynamic_to_json, json_to_dynamic};

/// What a script run produced: a plain value, or a control-flow signal the
/// Runtime must act on.
pub enum ScriptOutcome {
    Value(Value),
    Suspend { code: String, msg: String },
    Break { msg: String },
}

const SIGNAL_KEY: &str = "__signal";

pub struct ScriptHost {
    store: Arc<RunStore>,
    trx: String,
    log_id: String,
    response: ResponseChannel,
    cache: Arc<RequestCache>,
    http_client: reqwest::Client,
}

impl ScriptHost {
    pub fn new(
        store: Arc<RunStore>,
        trx: String,
        log_id: String,
        response: ResponseChannel,
        cache: Arc<RequestCache>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            store,
            trx,
            log_id,
            response,
            cache,
            http_client,
        }
    }

    /// Compiles and runs `script_text`, then calls its `handler(input)`
    /// entry point, bounded by `timeout`.
    pub async fn run(&self, script_text: &str, input: Value, timeout: Duration) -> Result<ScriptOutcome, EngineError> {
        let engine = self.build_engine(timeout);

        let ast = engine
            .compile(script_text)
            .map_err(|e| EngineError::RunScript(e.to_string()))?;

        let mut scope = Scope::new();
        let input_dynamic = json_to_dynamic(&input);

        let handle = tokio::task::block_in_place(|| {
            engine.call_fn::<Dynamic>(&mut scope, &ast, "handler", (input_dynamic,))
        });

        match handle {
            Ok(value) => Ok(ScriptOutcome::Value(dynamic_to_json(&value))),
            Err(err) => Self::classify_error(*err),
        }
    }

    fn classify_error(err: EvalAltResult) -> Result<ScriptOutcome, EngineError> {
        if let EvalAltResult::ErrorRuntime(token, _) = &err {
            if let Some(map) = token.clone().try_cast::<RhaiMap>() {
                if let Some(signal) = map.get(SIGNAL_KEY).and_then(|d| d.clone().try_cast::<String>()) {
                    match signal.as_str() {
                        "suspend" => {
                            let code = map.get("code").and_then(|d| d.clone().try_cast::<String>()).unwrap_or_default();
                            let msg = map.get("msg").and_then(|d| d.clone().try_cast::<String>()).unwrap_or_default();
                            return Ok(ScriptOutcome::Suspend { code, msg });
                        }
                        "break" => {
                            let msg = map.get("msg").and_then(|d| d.clone().try_cast::<String>()).unwrap_or_default();
                            return Ok(ScriptOutcome::Break { msg });
                        }
                        _ => {}
                    }
                }
            }
        }
        if matches!(err, EvalAltResult::ErrorTerminated(..)) {
            return Err(EngineError::RunScript("script run timeout".to_string()));
        }
        Err(EngineError::ScriptFuncCall(err.to_string()))
    }

    fn build_engine(&self, timeout: Duration) -> Engine {
        let mut engine = Engine::new();

        let deadline = Instant::now() + timeout;
        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(Dynamic::from("script run timeout"))
            } else {
                None
            }
        });

        self.register_log(&mut engine);
        self.register_data(&mut engine);
        self.register_ids(&mut engine);
        self.register_control_flow(&mut engine);
        self.register_response(&mut engine);
        self.register_request(&mut engine);
        self.register_base64(&mut engine);
        self.register_crypto_stubs(&mut engine);

        engine
    }

    fn register_log(&self, engine: &mut Engine) {
        let mut module = rhai::Module::new();
        module.set_native_fn("info", |msg: &str| {
            tracing::info!(target: "script", "{msg}");
            Ok(())
        });
        module.set_native_fn("warn", |msg: &str| {
            tracing::warn!(target: "script", "{msg}");
            Ok(())
        });
        module.set_native_fn("error", |msg: &str| {
            tracing::error!(target: "script", "{msg}");
            Ok(())
        });
        module.set_native_fn("debug", |msg: &str| {
            tracing::debug!(target: "script", "{msg}");
            Ok(())
        });
        engine.register_static_module("log", module.into());
    }

    fn register_data(&self, engine: &mut Engine) {
        let mut module = rhai::Module::new();

        let store = self.store.clone();
        module.set_native_fn("load", move |path: &str| {
            let key = format!("global_store.{path}");
            let store = store.clone();
            let value = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(store.get(&key)));
            Ok(value.map(|v| json_to_dynamic(&v)).unwrap_or(Dynamic::UNIT))
        });

        let store = self.store.clone();
        module.set_native_fn("store", move |path: &str, value: Dynamic| {
            let key = format!("global_store.{path}");
            let json_value = dynamic_to_json(&value);
            let store = store.clone();
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(store.set(&key, json_value))
            });
            Ok(())
        });

        engine.register_static_module("data", module.into());
    }

    fn register_ids(&self, engine: &mut Engine) {
        let trx = self.trx.clone();
        engine.register_fn("trx", move || trx.clone());
        let log_id = self.log_id.clone();
        engine.register_fn("log_id", move || log_id.clone());
        engine.register_fn("new_uuid", || Uuid::new_v4().to_string());
    }

    fn register_control_flow(&self, engine: &mut Engine) {
        engine.register_result_fn("suspend", |code: &str, msg: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            Err(signal_error("suspend", code, msg))
        });
        engine.register_result_fn("suspend", |msg: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            Err(signal_error("suspend", "", msg))
        });
        // Named `break_run`, not `break`: `break` is a reserved rhai
        // keyword and cannot be used as a callable function name.
        engine.register_result_fn("break_run", |msg: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            Err(signal_error("break", "", msg))
        });
    }

    fn register_response(&self, engine: &mut Engine) {
        let response = self.response.clone();
        engine.register_fn("response", move |obj: Dynamic| {
            let payload = dynamic_to_json(&obj);
            let response = response.clone();
            let (code, msg, data) = split_response_payload(payload);
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(response.deliver_and_close(ResponseData { code, msg, data }))
            });
        });
    }

    fn register_request(&self, engine: &mut Engine) {
        let cache = self.cache.clone();
        let client = self.http_client.clone();
        engine.register_result_fn("request", move |arg: RhaiMap| -> Result<Dynamic, Box<EvalAltResult>> {
            let spec = build_request_spec(&arg);
            let cache = cache.clone();
            let client = client.clone();
            let use_cache = arg.get("is_cache").map(|d| d.clone().cast::<bool>()).unwrap_or(false);
            let only_data = arg.get("only_data").map(|d| d.clone().cast::<bool>()).unwrap_or(true);

            let result: Result<Value, EngineError> = tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async {
                    if use_cache {
                        let key = RequestCache::key_for(&spec.url, &spec.body);
                        cache
                            .get_or_compute(&key, move || async move {
                                http::execute(&client, &spec).await.map(response_to_value)
                            })
                            .await
                    } else {
                        http::execute(&client, &spec).await.map(response_to_value)
                    }
                })
            });

            match result {
                Ok(full) if only_data => Ok(json_to_dynamic(&full["data"])),
                Ok(full) => Ok(json_to_dynamic(&full)),
                Err(e) => Err(Box::new(EvalAltResult::ErrorRuntime(
                    Dynamic::from(e.message()),
                    rhai::Position::NONE,
                ))),
            }
        });
    }

    fn register_base64(&self, engine: &mut Engine) {
        let mut module = rhai::Module::new();
        module.set_native_fn("encode", |s: &str| Ok(base64::engine::general_purpose::STANDARD.encode(s.as_bytes())));
        module.set_native_fn("decode", |s: &str| {
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                .map_err(|e| e.to_string().into())
        });
        engine.register_static_module("base64", module.into());
    }

    fn register_crypto_stubs(&self, engine: &mut Engine) {
        let mut module = rhai::Module::new();
        module.set_native_fn("encrypt", |_plain: &str, _key_name: &str| -> Result<String, Box<EvalAltResult>> {
            Err(EngineError::ModuleArg("no secret store configured for aes".to_string()).message().into())
        });
        module.set_native_fn("decrypt", |_cipher: &str, _key_name: &str| -> Result<String, Box<EvalAltResult>> {
            Err(EngineError::ModuleArg("no secret store configured for aes".to_string()).message().into())
        });
        engine.register_static_module("aes", module.into());

        let mut rsa_module = rhai::Module::new();
        rsa_module.set_native_fn("encrypt", |_plain: &str, _key_name: &str| -> Result<String, Box<EvalAltResult>> {
            Err(EngineError::ModuleArg("no secret store configured for rsa".to_string()).message().into())
        });
        rsa_module.set_native_fn("decrypt", |_cipher: &str, _key_name: &str| -> Result<String, Box<EvalAltResult>> {
            Err(EngineError::ModuleArg("no secret store configured for rsa".to_string()).message().into())
        });
        engine.register_static_module("rsa", rsa_module.into());
    }
}

fn signal_error(signal: &str, code: &str, msg: &str) -> Box<EvalAltResult> {
    let mut map = RhaiMap::new();
    map.insert(SIGNAL_KEY.into(), Dynamic::from(signal.to_string()));
    map.insert("code".into(), Dynamic::from(code.to_string()));
    map.insert("msg".into(), Dynamic::from(msg.to_string()));
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(map), rhai::Position::NONE))
}

fn split_response_payload(payload: Value) -> (i32, String, Value) {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0) as i32;
    let msg = payload
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    (code, msg, data)
}

fn build_request_spec(arg: &RhaiMap) -> ApiRequestSpec {
    let mut spec = ApiRequestSpec::default();
    if let Some(url) = arg.get("url").and_then(|d| d.clone().try_cast::<String>()) {
        spec.url = url;
    }
    if let Some(method) = arg.get("method").and_then(|d| d.clone().try_cast::<String>()) {
        spec.method = method;
    }
    if let Some(body) = arg.get("body") {
        spec.body = dynamic_to_json(body);
    }
    if let Some(content_type) = arg.get("content_type").and_then(|d| d.clone().try_cast::<String>()) {
        spec.content_type = content_type;
    }
    if let Some(data_type) = arg.get("data_type").and_then(|d| d.clone().try_cast::<String>()) {
        spec.data_type = data_type;
    }
    if let Some(response_type) = arg.get("response_type").and_then(|d| d.clone().try_cast::<String>()) {
        spec.response_type = response_type;
    }
    spec
}

fn response_to_value(resp: http::ApiResponse) -> Value {
    serde_json::json!({
        "data": resp.body,
        "status": resp.status,
        "header": resp.header,
        "cookies": resp.cookies,
    })
}

use base64::Engine as _;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_host() -> ScriptHost {
        ScriptHost::new(
            Arc::new(RunStore::new()),
            "trx-1".into(),
            "log-1".into(),
            ResponseChannel::new(),
            Arc::new(RequestCache::default()),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn handler_return_value_is_exported() {
        let host = test_host();
        let script = r#"
            fn handler(input) {
                #{ doubled: input.n * 2 }
            }
        "#;
        let outcome = host.run(script, json!({"n": 21}), Duration::from_secs(5)).await.unwrap();
        match outcome {
            ScriptOutcome::Value(v) => assert_eq!(v["doubled"], json!(42)),
            _ => panic!("expected a value outcome"),
        }
    }

    #[tokio::test]
    async fn suspend_builtin_produces_suspend_outcome() {
        let host = test_host();
        let script = r#"
            fn handler(input) {
                suspend("E42", "paused");
                "unreachable"
            }
        "#;
        let outcome = host.run(script, Value::Null, Duration::from_secs(5)).await.unwrap();
        match outcome {
            ScriptOutcome::Suspend { code, msg } => {
                assert_eq!(code, "E42");
                assert_eq!(msg, "paused");
            }
            _ => panic!("expected a suspend outcome"),
        }
    }

    #[tokio::test]
    async fn break_run_builtin_produces_break_outcome() {
        let host = test_host();
        let script = r#"
            fn handler(input) {
                break_run("stop here");
            }
        "#;
        let outcome = host.run(script, Value::Null, Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, ScriptOutcome::Break { msg } if msg == "stop here"));
    }

    // `block_in_place` panics outside a multi-threaded runtime; every other
    // test in this module never touches a builtin that calls it.
    #[tokio::test(flavor = "multi_thread")]
    async fn data_store_then_load_round_trips_through_global_store() {
        let host = test_host();
        let script = r#"
            fn handler(input) {
                data::store("counter", 7);
                data::load("counter")
            }
        "#;
        let outcome = host.run(script, Value::Null, Duration::from_secs(5)).await.unwrap();
        match outcome {
            ScriptOutcome::Value(v) => assert_eq!(v, json!(7)),
            _ => panic!("expected a value outcome"),
        }
    }
}
