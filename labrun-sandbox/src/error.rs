//! Error types for the lab sandbox

use labrun_common::{FailureKind, Language};
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the execution substrate or of run limits.
///
/// Never returned from `LanguageRunner::execute`; runners fold these into an
/// `ExecutionResult` through [`SandboxError::failure_kind`] and `Display`.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Run exceeded the policy timeout
    #[error("Execution timed out: execution took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Run was terminated through `stop()`
    #[error("Execution stopped")]
    Stopped,

    /// The isolate or guest memory hit the heap ceiling
    #[error("Execution exceeded the memory limit")]
    MemoryLimit,

    /// Worker thread or isolate could not be created, or died without reporting
    #[error("Worker error: {0}")]
    Worker(String),

    /// TypeScript source could not be parsed for type stripping
    #[error("TypeScript error: {0}")]
    TypeScript(String),

    /// Interpreter binary could not be fetched or compiled, or its health check failed
    #[error("Python interpreter failed to load: {0}")]
    InterpreterBoot(String),

    /// Interpreter instance failed outside of user code
    #[error("Python runtime error: {0}")]
    Interpreter(String),

    /// Runtime backend not compiled into this build
    #[error("{runtime} runtime not enabled. Compile with --features {feature}")]
    Unavailable {
        runtime: &'static str,
        feature: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}

impl SandboxError {
    /// Classification reported on the `ExecutionResult`
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SandboxError::Timeout { .. } => FailureKind::Timeout,
            SandboxError::Stopped => FailureKind::Stopped,
            // Source that fails to parse is the learner's to fix
            SandboxError::TypeScript(_) | SandboxError::MemoryLimit => FailureKind::UserCode,
            _ => FailureKind::Sandbox,
        }
    }
}

/// Invalid sandbox policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("capabilities are both allowed and blocked: {}", .0.join(", "))]
    CapabilityConflict(Vec<String>),

    #[error("invalid {field}: {reason}")]
    InvalidLimit { field: &'static str, reason: String },
}

/// Errors loading or saving the labrun configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid sandbox policy: {0}")]
    Policy(#[from] PolicyError),
}

/// Dispatch-time misuse: no runner can be chosen for the request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Language '{0}' is not supported for execution")]
    UnsupportedLanguage(Language),

    #[error("Cannot determine the language of '{0}'")]
    UnknownFileType(String),

    #[error("File '{0}' is not part of the project")]
    FileNotFound(String),

    #[error("Invalid sandbox policy: {0}")]
    Policy(#[from] PolicyError),
}
