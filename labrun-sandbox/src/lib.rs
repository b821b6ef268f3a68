//! labrun sandbox - runs learners' code in isolated environments
//!
//! JavaScript and TypeScript run on single-use V8 isolates, Python on a
//! CPython WASI module hosted by wasmtime. Every run returns an
//! [`ExecutionResult`]; only dispatch-time misuse is reported as an error.

mod config;
mod dispatch;
mod error;
mod execution;
mod format;
mod host;
mod policy;
mod runtime;

pub use config::{InterpreterSource, LabrunConfig, PythonConfig, DEFAULT_PRELOAD_PACKAGES, PYTHON_WASM_ENV};
pub use dispatch::{create_runner, is_language_supported, supported_languages, RunnerFactory};
pub use error::{ConfigError, DispatchError, PolicyError, SandboxError};
pub use execution::ExecutionId;
pub use format::{format_js_error, strip_internal_js_frames, strip_internal_python_frames};
pub use host::ProjectRunner;
pub use policy::{
    SandboxPolicy, DEFAULT_ALLOWED_CAPABILITIES, DEFAULT_BLOCKED_CAPABILITIES, DEFAULT_BLOCKED_MODULES,
};
#[cfg(feature = "javascript")]
pub use runtime::strip_typescript_types;
#[cfg(feature = "python")]
pub use runtime::{BootOptions, InterpreterCell, InterpreterState};
pub use runtime::{JavaScriptRunner, LanguageRunner, PythonRunner};

pub use labrun_common::{
    detect_language, ConsoleLogEntry, ExecutionResult, FailureKind, FileMap, Language, LogKind,
};
