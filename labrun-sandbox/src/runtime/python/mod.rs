//! Python runner on a CPython WASI module hosted by wasmtime

mod capture;
mod cell;
mod interpreter;

use self::interpreter::{Exit, PythonJob, RunCapture};
use super::{finish_result, sandbox_failure, LanguageRunner};
use crate::config::PythonConfig;
use crate::error::SandboxError;
use crate::format::strip_internal_python_frames;
use crate::policy::SandboxPolicy;
use async_trait::async_trait;
use labrun_common::{ConsoleLogEntry, ExecutionResult, FailureKind, FileMap, Language, LogCollector, LogKind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub use self::cell::{InterpreterCell, InterpreterState};
pub use self::interpreter::{BootOptions, PythonInterpreter};

/// Host-side allowance past the guest deadline before a run is abandoned
const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_ENTRY: &str = "<main>";

/// Runs Python source in a shared, lazily booted interpreter.
///
/// Each run gets its own guest instance. Runs cannot be interrupted from the
/// host once started; [`stop`](LanguageRunner::stop) only prevents runs still
/// waiting for the interpreter from starting, the policy timeout bounds the rest.
pub struct PythonRunner {
    policy: SandboxPolicy,
    config: PythonConfig,
    cell: Option<Arc<InterpreterCell>>,
    stop: Mutex<CancellationToken>,
}

impl PythonRunner {
    pub fn new(policy: SandboxPolicy, config: PythonConfig) -> Self {
        let cell = config.interpreter_source().map(|source| {
            InterpreterCell::shared(BootOptions {
                source,
                stdlib_dir: config.stdlib_dir.clone(),
                preload: config.preload_packages.clone(),
                boot_timeout: config.boot_timeout,
            })
        });

        Self::with_cell(policy, config, cell)
    }

    /// Runner bound to a specific cell instead of the process-wide one
    pub fn with_cell(policy: SandboxPolicy, config: PythonConfig, cell: Option<Arc<InterpreterCell>>) -> Self {
        Self {
            policy,
            config,
            cell,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Boot state of the interpreter this runner uses
    pub fn interpreter_state(&self) -> InterpreterState {
        self.cell
            .as_ref()
            .map_or(InterpreterState::Uninitialized, |cell| cell.state())
    }

    fn stop_token(&self) -> CancellationToken {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn run(&self, entry: Option<&str>, source: &str, files: &FileMap) -> ExecutionResult {
        let started = Instant::now();
        let stop = self.stop_token();

        let Some(cell) = &self.cell else {
            let err = SandboxError::InterpreterBoot(format!(
                "no interpreter configured; set python.interpreter or {}",
                crate::config::PYTHON_WASM_ENV
            ));
            return sandbox_failure(started, &err);
        };

        let interpreter = tokio::select! {
            booted = cell.get() => booted,
            _ = stop.cancelled() => return sandbox_failure(started, &SandboxError::Stopped),
        };
        let interpreter = match interpreter {
            Ok(interpreter) => interpreter,
            Err(err) => return sandbox_failure(started, &err),
        };
        if stop.is_cancelled() {
            return sandbox_failure(started, &SandboxError::Stopped);
        }

        let job = PythonJob {
            source: source.to_string(),
            entry: entry.unwrap_or(DEFAULT_ENTRY).to_string(),
            files: files.clone(),
            blocked_modules: self.policy.blocked_modules.iter().cloned().collect(),
            timeout: self.policy.timeout,
            max_memory_bytes: self.config.max_memory_bytes,
            max_log_entries: self.policy.max_log_entries,
            max_output_chars: self.policy.max_output_bytes,
        };

        let task = tokio::task::spawn_blocking(move || interpreter.run(job));
        let captured = match tokio::time::timeout(self.policy.timeout + TIMEOUT_GRACE, task).await {
            Ok(Ok(Ok(captured))) => captured,
            Ok(Ok(Err(err))) => {
                tracing::warn!(error = %err, "Python run failed");
                return sandbox_failure(started, &err);
            }
            Ok(Err(e)) => {
                let err = SandboxError::Interpreter(format!("run task failed: {e}"));
                tracing::warn!(error = %err, "Python run failed");
                return sandbox_failure(started, &err);
            }
            Err(_) => {
                tracing::warn!("Python run outlived its deadline, abandoning it");
                return sandbox_failure(
                    started,
                    &SandboxError::Timeout {
                        timeout_ms: self.policy.timeout_ms(),
                    },
                );
            }
        };

        self.complete(started, captured)
    }

    fn complete(&self, started: Instant, run: RunCapture) -> ExecutionResult {
        let mut logs = LogCollector::new(self.policy.max_log_entries);
        let completed = run.capture.summary.is_some();
        let (output, error) = run.capture.into_logs(&mut logs);

        let failure = match (run.exit, error) {
            (Exit::Interrupted, _) => {
                let err = SandboxError::Timeout {
                    timeout_ms: self.policy.timeout_ms(),
                };
                Some((err.failure_kind(), err.to_string()))
            }
            (_, Some(traceback)) => Some((
                FailureKind::UserCode,
                strip_internal_python_frames(&traceback),
            )),
            _ if completed => None,
            _ if run.memory_exceeded => {
                let err = SandboxError::MemoryLimit;
                logs.push(ConsoleLogEntry::now(LogKind::Error, err.to_string()));
                Some((err.failure_kind(), err.to_string()))
            }
            (Exit::Trapped(detail), None) => Some(interpreter_failure(detail, &run.stderr)),
            (Exit::Code(code), None) => Some(interpreter_failure(
                format!("interpreter exited with status {code}"),
                &run.stderr,
            )),
        };

        finish_result(
            &self.policy,
            started,
            logs,
            &output,
            failure,
            run.memory_usage_bytes,
        )
    }
}

/// The guest died without reporting a result
fn interpreter_failure(detail: String, stderr: &str) -> (FailureKind, String) {
    let stderr = stderr.trim();
    let err = SandboxError::Interpreter(if stderr.is_empty() {
        detail
    } else {
        format!("{detail}\n{stderr}")
    });
    tracing::warn!(error = %err, "Python interpreter failed");
    (err.failure_kind(), err.to_string())
}

#[async_trait]
impl LanguageRunner for PythonRunner {
    async fn execute(&self, source: &str, files: &FileMap) -> ExecutionResult {
        self.run(None, source, files).await
    }

    async fn execute_file(&self, path: &str, source: &str, files: &FileMap) -> ExecutionResult {
        self.run(Some(path), source, files).await
    }

    fn stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        stop.cancel();
        *stop = CancellationToken::new();
    }

    fn is_supported(&self) -> bool {
        self.cell.is_some()
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn name(&self) -> &str {
        "cpython-wasi"
    }
}
