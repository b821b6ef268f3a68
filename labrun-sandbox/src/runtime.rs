//! Runner trait and implementations

#[cfg(feature = "javascript")]
mod javascript;
#[cfg(feature = "python")]
mod python;

use crate::error::SandboxError;
use crate::policy::SandboxPolicy;
use async_trait::async_trait;
use labrun_common::{truncate_output, ExecutionResult, FailureKind, FileMap, Language, LogCollector};
use std::time::Instant;

#[cfg(feature = "javascript")]
pub use javascript::{strip_typescript_types, JavaScriptRunner};
#[cfg(feature = "python")]
pub use python::{BootOptions, InterpreterCell, InterpreterState, PythonRunner};

/// Executes untrusted source text for one language
#[async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Run `source` with the project's other files available.
    ///
    /// Never fails outward: substrate faults, timeouts and user errors all
    /// come back as an unsuccessful [`ExecutionResult`].
    async fn execute(&self, source: &str, files: &FileMap) -> ExecutionResult;

    /// Like [`execute`](Self::execute), for the project file at `path`.
    ///
    /// Runners use the path to name the entry in stack traces and to skip it
    /// when loading sibling files.
    async fn execute_file(&self, path: &str, source: &str, files: &FileMap) -> ExecutionResult {
        let _ = path;
        self.execute(source, files).await
    }

    /// Terminate any in-flight execution owned by this runner. Idempotent.
    fn stop(&self);

    /// Whether the host environment can run this language at all
    fn is_supported(&self) -> bool;

    fn language(&self) -> Language;

    /// Get runner name
    fn name(&self) -> &str;
}

/// Assemble the final result, applying output and log truncation
pub(crate) fn finish_result(
    policy: &SandboxPolicy,
    started: Instant,
    logs: LogCollector,
    output: &str,
    failure: Option<(FailureKind, String)>,
    memory_usage_bytes: Option<u64>,
) -> ExecutionResult {
    let (failure, error) = match failure {
        Some((kind, message)) => (Some(kind), Some(message)),
        None => (None, None),
    };

    ExecutionResult {
        success: failure.is_none(),
        output: truncate_output(output, policy.max_output_bytes),
        error,
        execution_time_ms: started.elapsed().as_millis() as u64,
        memory_usage_bytes,
        logs: logs.finish(),
        failure,
    }
}

/// Result for a run that never reached user code
pub(crate) fn sandbox_failure(started: Instant, error: &SandboxError) -> ExecutionResult {
    ExecutionResult::failed(error.failure_kind(), error.to_string(), started.elapsed())
}

/// JavaScript runner placeholder (when feature is disabled)
#[cfg(not(feature = "javascript"))]
pub struct JavaScriptRunner {
    language: Language,
}

#[cfg(not(feature = "javascript"))]
impl JavaScriptRunner {
    pub fn new(_policy: SandboxPolicy) -> Self {
        Self {
            language: Language::JavaScript,
        }
    }

    pub fn typescript(_policy: SandboxPolicy) -> Self {
        Self {
            language: Language::TypeScript,
        }
    }
}

#[cfg(not(feature = "javascript"))]
#[async_trait]
impl LanguageRunner for JavaScriptRunner {
    async fn execute(&self, _source: &str, _files: &FileMap) -> ExecutionResult {
        sandbox_failure(
            Instant::now(),
            &SandboxError::Unavailable {
                runtime: "JavaScript",
                feature: "javascript",
            },
        )
    }

    fn stop(&self) {}

    fn is_supported(&self) -> bool {
        false
    }

    fn language(&self) -> Language {
        self.language
    }

    fn name(&self) -> &str {
        "v8"
    }
}

/// Python runner placeholder (when feature is disabled)
#[cfg(not(feature = "python"))]
pub struct PythonRunner;

#[cfg(not(feature = "python"))]
impl PythonRunner {
    pub fn new(_policy: SandboxPolicy, _config: crate::config::PythonConfig) -> Self {
        Self
    }
}

#[cfg(not(feature = "python"))]
#[async_trait]
impl LanguageRunner for PythonRunner {
    async fn execute(&self, _source: &str, _files: &FileMap) -> ExecutionResult {
        sandbox_failure(
            Instant::now(),
            &SandboxError::Unavailable {
                runtime: "Python",
                feature: "python",
            },
        )
    }

    fn stop(&self) {}

    fn is_supported(&self) -> bool {
        false
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn name(&self) -> &str {
        "cpython-wasi"
    }
}
