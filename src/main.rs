//! CLI entry point: loads a rule document and a request fixture from disk,
//! runs one execution through the [`runner::Runner`], and prints the
//! resolved response body alongside the full run log.
//!
//! Grounded on the teacher's `main.rs` (`clap` derive CLI, `Commands::Execute`
//! loading a plan file, telemetry bootstrap before dispatch, JSON report on
//! stdout) generalized from "load a UTDL plan" to "load a rule + one request
//! fixture", since a full HTTP front end that resolves `(method, path)` to a
//! rule via [`external::RuleStore`] is out of scope here.

mod cache;
mod channels;
mod config;
mod errors;
mod external;
mod hash;
mod http;
mod log;
mod model;
mod pool;
mod runner;
mod runtime;
mod script;
mod store;
mod telemetry;
mod validation;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use uuid::Uuid;

use config::EngineConfig;
use errors::EngineError;
use external::ScriptStore;
use model::Rule;
use pool::WorkerPool;
use store::RunStore;
use telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "flowengine")]
#[command(about = "Rule-driven request/script execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs one request fixture through a rule document and prints the result.
    Run {
        /// Path to the rule document (JSON).
        #[arg(short, long)]
        rule: PathBuf,

        /// Path to the inbound request fixture (JSON): `{"query":{},"body":{},"header":{}}`.
        #[arg(short = 'f', long)]
        request: PathBuf,

        /// Directory of `.rhai` script sources, looked up by a script
        /// component's `url` field. Required only if the rule has script
        /// components.
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Enables OpenTelemetry trace export.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// OTLP collector endpoint, used only with `--otel`.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Verbose (debug-level) logging.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// Custom transaction id; a UUID v4 is generated if omitted.
        #[arg(long)]
        trx: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { rule, request, scripts, otel, otel_endpoint, verbose, trx } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if verbose { Level::DEBUG } else { Level::INFO };

            if otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint);
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = telemetry::init_telemetry(telemetry_config) {
                eprintln!("Warning: failed to initialize telemetry: {e}");
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run_once(rule, request, scripts, trx).await;

            telemetry::shutdown_telemetry();
            std::process::exit(exit_code);
        }
    }
}

/// A `ScriptStore` that reads `<dir>/<name>.rhai` from disk. Good enough for
/// the CLI fixture runner; a real deployment wires in whatever persistent
/// store actually holds script history.
struct FileScriptStore {
    dir: PathBuf,
}

#[async_trait]
impl ScriptStore for FileScriptStore {
    async fn load_script(&self, name: &str) -> Result<(String, String), EngineError> {
        let path = self.dir.join(format!("{name}.rhai"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::ModuleArg(format!("script `{name}` not found at {path:?}: {e}")))?;
        Ok((text, "local".to_string()))
    }
}

async fn run_once(rule_path: PathBuf, request_path: PathBuf, scripts_dir: Option<PathBuf>, trx: Option<String>) -> i32 {
    let rule = match load_rule(&rule_path) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, path = %rule_path.display(), "failed to load rule");
            return 1;
        }
    };

    let fixture = match load_request_fixture(&request_path) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, path = %request_path.display(), "failed to load request fixture");
            return 1;
        }
    };

    let mut validation_errors = Vec::new();

    let query = validation::validate_fields(&fixture.query, &rule.request.query).unwrap_or_else(|errs| {
        validation_errors.extend(errs);
        HashMap::new()
    });
    let header = validation::validate_fields(&fixture.header, &rule.request.header).unwrap_or_else(|errs| {
        validation_errors.extend(errs);
        HashMap::new()
    });
    let body = validation::validate_fields(&fixture.body, &rule.request.body).unwrap_or_else(|errs| {
        validation_errors.extend(errs);
        HashMap::new()
    });

    if !validation_errors.is_empty() {
        for err in &validation_errors {
            error!("request validation failed: {err}");
        }
        return 1;
    }

    let trx = trx.unwrap_or_else(|| Uuid::new_v4().to_string());
    let log_id = Uuid::new_v4().to_string();

    info!(trx = %trx, rule_version = %rule.version, "starting run");

    let config = Arc::new(EngineConfig::from_env());
    let store = Arc::new(RunStore::seeded(HashMap::from([(
        "request".to_string(),
        serde_json::json!({"query": query, "body": body, "header": header}),
    )])));
    let cache = Arc::new(crate::cache::RequestCache::new(config.cache_ttl));
    let http_client = reqwest::Client::new();
    let script_store: Option<Arc<dyn ScriptStore>> = scripts_dir.map(|dir| Arc::new(FileScriptStore { dir }) as Arc<dyn ScriptStore>);

    let pool = WorkerPool::new(config.max_workers);
    let (result_tx, result_rx) = tokio::sync::oneshot::channel();

    let admitted = {
        let rule = rule.clone();
        let trx_spawn = trx.clone();
        let log_id_spawn = log_id.clone();
        pool.spawn(move || async move {
            let runner = runner::Runner::new(
                config,
                store,
                cache,
                http_client,
                script_store,
                trx_spawn,
                log_id_spawn,
                "POST".to_string(),
                "/cli/run".to_string(),
            );
            let outcome = runner.run(&rule).await;
            let _ = result_tx.send(outcome);
        })
        .await
    };

    if let Err(e) = admitted {
        error!(error = %e, "failed to admit run onto the worker pool");
        return 1;
    }

    match result_rx.await {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome.response_body).unwrap_or_default());
            info!(trx = %trx, status = ?outcome.run_log.status, "run finished");
            if let Some(checkpoint) = &outcome.suspend {
                info!(trx = %trx, err_code = %checkpoint.err_code, "run suspended, checkpoint captured");
            }
            if matches!(outcome.run_log.status, Some(model::RunStatus::Success)) {
                0
            } else {
                1
            }
        }
        Err(_) => {
            error!("worker task dropped before delivering a result");
            1
        }
    }
}

fn load_rule(path: &PathBuf) -> Result<Rule, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

struct RequestFixture {
    query: HashMap<String, serde_json::Value>,
    body: HashMap<String, serde_json::Value>,
    header: HashMap<String, serde_json::Value>,
}

fn load_request_fixture(path: &PathBuf) -> Result<RequestFixture, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    let obj = value.as_object().ok_or("request fixture must be a JSON object")?;

    let extract = |key: &str| -> HashMap<String, serde_json::Value> {
        obj.get(key)
            .and_then(|v| v.as_object())
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    };

    Ok(RequestFixture {
        query: extract("query"),
        body: extract("body"),
        header: extract("header"),
    })
}
