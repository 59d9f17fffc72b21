//! Structured, numerically-coded engine errors.
//!
//! Every failure surfaced by the engine carries one of the fixed status
//! codes below, mirroring the error envelope `{code, msg}` that ships in
//! an engine response or a suspend checkpoint.

use thiserror::Error;

/// Numeric status code attached to every `EngineError`.
///
/// These values are part of the wire contract (they appear verbatim in
/// response error envelopes and suspend checkpoints) and must not be
/// renumbered.
pub mod code {
    pub const SYSTEM_PANIC: u32 = 110_000;
    pub const RUN_SCRIPT: u32 = 110_001;
    pub const SCRIPT_FUNC_CALL: u32 = 110_002;
    pub const SCRIPT_RETURN: u32 = 110_003;
    pub const CONDITION: u32 = 110_004;
    pub const MODULE_ARG: u32 = 110_005;
    pub const REQUEST: u32 = 110_006;
    pub const NETWORK: u32 = 110_007;
    pub const ACTIVE_BREAK: u32 = 110_008;
    pub const ACTIVE_SUSPEND: u32 = 110_009;
    pub const ERROR_BREAK: u32 = 110_010;
    pub const ERROR_SUSPEND: u32 = 110_011;
}

/// An engine failure, classified per the error classes in the design doc.
///
/// `Custom` errors carry an upstream-defined code (e.g. a script calling
/// `suspend("E42", "paused")`) rather than one of the fixed constants.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("system panic: {0}")]
    SystemPanic(String),

    #[error("failed to run script: {0}")]
    RunScript(String),

    #[error("failed to call script function: {0}")]
    ScriptFuncCall(String),

    #[error("script returned an unsupported value: {0}")]
    ScriptReturn(String),

    #[error("condition evaluation failed: {0}")]
    Condition(String),

    #[error("module called with invalid arguments: {0}")]
    ModuleArg(String),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("active break: {0}")]
    ActiveBreak(String),

    #[error("active suspend [{code}]: {msg}")]
    ActiveSuspend { code: String, msg: String },

    #[error("error break: {0}")]
    ErrorBreak(String),

    #[error("error suspend: {0}")]
    ErrorSuspend(String),

    #[error("[{code}] {msg}")]
    Custom { code: String, msg: String },
}

impl EngineError {
    pub fn code(&self) -> String {
        match self {
            EngineError::SystemPanic(_) => code::SYSTEM_PANIC.to_string(),
            EngineError::RunScript(_) => code::RUN_SCRIPT.to_string(),
            EngineError::ScriptFuncCall(_) => code::SCRIPT_FUNC_CALL.to_string(),
            EngineError::ScriptReturn(_) => code::SCRIPT_RETURN.to_string(),
            EngineError::Condition(_) => code::CONDITION.to_string(),
            EngineError::ModuleArg(_) => code::MODULE_ARG.to_string(),
            EngineError::Request(_) => code::REQUEST.to_string(),
            EngineError::Network(_) => code::NETWORK.to_string(),
            EngineError::ActiveBreak(_) => code::ACTIVE_BREAK.to_string(),
            EngineError::ActiveSuspend { code, .. } => code.clone(),
            EngineError::ErrorBreak(_) => code::ERROR_BREAK.to_string(),
            EngineError::ErrorSuspend(_) => code::ERROR_SUSPEND.to_string(),
            EngineError::Custom { code, .. } => code.clone(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            EngineError::ActiveSuspend { msg, .. } => msg.clone(),
            EngineError::Custom { msg, .. } => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Transient classes are retried by the Runtime; everything else either
    /// breaks or suspends the run.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }

    /// ActiveBreak / ErrorBreak terminate immediately, no checkpoint, ever.
    pub fn is_break(&self) -> bool {
        matches!(self, EngineError::ActiveBreak(_) | EngineError::ErrorBreak(_))
    }

    /// ActiveSuspend / ErrorSuspend checkpoint when `rule.suspend` is set.
    pub fn is_suspendable(&self) -> bool {
        matches!(
            self,
            EngineError::ActiveSuspend { .. } | EngineError::ErrorSuspend(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_retriable() {
        let err = EngineError::Network("timeout".into());
        assert!(err.is_retriable());
        assert_eq!(err.code(), code::NETWORK.to_string());
    }

    #[test]
    fn break_errors_are_not_suspendable() {
        let err = EngineError::ErrorBreak("bad state".into());
        assert!(err.is_break());
        assert!(!err.is_suspendable());
    }

    #[test]
    fn active_suspend_carries_custom_code() {
        let err = EngineError::ActiveSuspend {
            code: "E42".into(),
            msg: "paused".into(),
        };
        assert_eq!(err.code(), "E42");
        assert!(err.is_suspendable());
        assert!(!err.is_retriable());
    }

    #[test]
    fn custom_error_formats_code_and_message() {
        let err = EngineError::Custom {
            code: "CUSTOM1".into(),
            msg: "upstream said no".into(),
        };
        assert_eq!(err.to_string(), "[CUSTOM1] upstream said no");
    }
}
