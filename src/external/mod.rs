//! External collaborator interfaces.
//!
//! Everything in this module is a contract, never an implementation: rule,
//! script, and secret persistence, run-log storage, and suspend-checkpoint
//! storage are all explicitly out of scope for this crate (a full
//! front-end service supplies concrete adapters — a SQL store, a cache,
//! whatever). Modeling them as `async_trait` traits with no default body
//! keeps the engine's own code (runtime, runner) decoupled from any one
//! backing technology, the same role `engine.Store`/`model.SuspendLog`
//! play in the Go original relative to `engine/runner.go`.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::model::{Rule, RunLog, SuspendCheckpoint};

/// Resolves a `(method, path)` HTTP trigger to the rule that governs it.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn load_rule(&self, method: &str, path: &str) -> Result<Rule, EngineError>;
}

/// Resolves a script component's `url` (really a name) to its source text
/// and an opaque version tag.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn load_script(&self, name: &str) -> Result<(String, String), EngineError>;
}

/// Resolves named secret material (e.g. for the ScriptHost's stubbed
/// `aes`/`rsa` builtins). Out of scope to implement; the trait exists so a
/// caller can wire one in.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn load_secret(&self, name: &str) -> Result<String, EngineError>;
}

/// Persists a finished run's log, sharded by the caller using
/// [`crate::hash::ConsistentHashRing`] over `trx`.
#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn save_run_log(&self, shard: &str, log: &RunLog) -> Result<(), EngineError>;
}

/// Persists, loads, and deletes suspend checkpoints. Deleting a checkpoint
/// must also delete its associated run-log row (transactional, per the
/// original's `Suspend`/`recover` pairing).
#[async_trait]
pub trait SuspendStore: Send + Sync {
    async fn save_suspend(&self, checkpoint: &SuspendCheckpoint) -> Result<(), EngineError>;
    async fn load_suspend(&self, trx: &str) -> Result<SuspendCheckpoint, EngineError>;
    async fn delete_suspend(&self, trx: &str) -> Result<(), EngineError>;
}
