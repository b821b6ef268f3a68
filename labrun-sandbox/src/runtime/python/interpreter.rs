//! CPython WASI module host.
//!
//! One compiled module is shared by every run; each run instantiates it in a
//! fresh [`Store`] with its own WASI context, scratch directory, memory limiter
//! and epoch deadline.

use super::capture::{Capture, ERROR_MARKER, EVENT_PREFIX, RESULT_PREFIX};
use crate::config::InterpreterSource;
use crate::error::SandboxError;
use labrun_common::{detect_language, normalize_relative_path, FileMap, Language};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use wasmtime::{Config, Engine, Linker, Module, ResourceLimiter, Store, Trap};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

const PRELUDE: &str = include_str!("prelude.py");

/// Compiles the prelude under its own file name so tracebacks can hide it
const BOOTSTRAP: &str =
    "import os;exec(compile(os.environ.pop('LABRUN_PRELUDE'),'<labrun-prelude>','exec'))";

/// Guest mount point of the per-run scratch directory
pub(crate) const SANDBOX_DIR: &str = "/sandbox";
const STDLIB_GUEST_DIR: &str = "/usr/local/lib";

/// Interval of the engine's epoch ticker
const EPOCH_TICK: Duration = Duration::from_millis(10);

const STDERR_CAPACITY: usize = 256 * 1024;
const MAX_TABLE_ELEMENTS: usize = 1_000_000;

/// Everything the interpreter needs to boot, also the key of the shared cell
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootOptions {
    pub source: InterpreterSource,
    pub stdlib_dir: Option<PathBuf>,
    pub preload: Vec<String>,
    pub boot_timeout: Duration,
}

/// One execution inside the guest
#[derive(Debug, Clone)]
pub(crate) struct PythonJob {
    pub source: String,
    /// File name shown for the entry in tracebacks
    pub entry: String,
    pub files: FileMap,
    pub blocked_modules: Vec<String>,
    pub timeout: Duration,
    pub max_memory_bytes: usize,
    pub max_log_entries: usize,
    pub max_output_chars: usize,
}

impl PythonJob {
    /// Bytes the prelude may stream before it starts dropping events
    fn capture_budget(&self) -> usize {
        self.max_output_chars
            .saturating_mul(4)
            .saturating_add(self.max_log_entries.saturating_mul(96))
            .saturating_add(64 * 1024)
    }

    /// Guest stdout pipe size: the event budget, output written past it,
    /// and room for the final summary and a capped traceback
    fn stdout_capacity(&self) -> usize {
        self.capture_budget()
            .saturating_add(self.max_output_chars.saturating_mul(12))
            .saturating_add(320 * 1024)
    }
}

#[derive(Debug)]
pub(crate) enum Exit {
    Code(i32),
    Interrupted,
    Trapped(String),
}

/// What a finished or interrupted guest left behind
#[derive(Debug)]
pub(crate) struct RunCapture {
    pub capture: Capture,
    pub exit: Exit,
    pub stderr: String,
    pub memory_usage_bytes: Option<u64>,
    pub memory_exceeded: bool,
}

struct MemoryLimiter {
    max_bytes: usize,
    exceeded: bool,
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.max_bytes {
            self.exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

struct StoreState {
    wasi: WasiP1Ctx,
    limiter: MemoryLimiter,
}

/// A compiled CPython module ready to instantiate
pub struct PythonInterpreter {
    engine: Arc<Engine>,
    module: Module,
    options: BootOptions,
}

impl std::fmt::Debug for PythonInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonInterpreter")
            .field("source", &self.options.source)
            .finish_non_exhaustive()
    }
}

impl PythonInterpreter {
    /// Compile `bytes` and start the engine's epoch ticker
    pub(crate) fn compile(bytes: &[u8], options: BootOptions) -> Result<Self, SandboxError> {
        let mut config = Config::new();
        config.epoch_interruption(true);

        let engine = Engine::new(&config)
            .map_err(|e| SandboxError::InterpreterBoot(format!("failed to create engine: {e}")))?;
        let module = Module::new(&engine, bytes)
            .map_err(|e| SandboxError::InterpreterBoot(format!("invalid WebAssembly module: {e:#}")))?;

        let engine = Arc::new(engine);
        spawn_epoch_ticker(Arc::downgrade(&engine))?;

        Ok(Self {
            engine,
            module,
            options,
        })
    }

    /// Import the preload set once, proving the module is a working interpreter
    pub(crate) fn health_check(&self) -> Result<String, SandboxError> {
        let config = json!({
            "health_check": true,
            "preload": self.options.preload,
            "result_prefix": RESULT_PREFIX,
        });
        let run = self.instantiate_and_run(
            &config,
            String::new(),
            None,
            self.options.boot_timeout,
            usize::MAX,
            1024 * 1024,
        )?;

        match (run.exit, run.capture.summary) {
            (_, Some(summary)) if summary.ok => Ok(summary.version.unwrap_or_default()),
            (_, Some(summary)) => Err(SandboxError::InterpreterBoot(format!(
                "preload failed: {}",
                summary.error.unwrap_or_default()
            ))),
            (Exit::Interrupted, None) => Err(SandboxError::InterpreterBoot(format!(
                "health check did not finish within {}ms",
                self.options.boot_timeout.as_millis()
            ))),
            (_, None) => Err(SandboxError::InterpreterBoot(format!(
                "interpreter did not start: {}",
                tail(&run.stderr)
            ))),
        }
    }

    /// Run `job` to completion or until its deadline; blocks the calling thread
    pub(crate) fn run(&self, job: PythonJob) -> Result<RunCapture, SandboxError> {
        let scratch = tempfile::Builder::new().prefix("labrun-py-").tempdir()?;
        write_project_files(scratch.path(), &job.files);

        let config = json!({
            "entry": job.entry,
            "sandbox_dir": SANDBOX_DIR,
            "blocked_modules": job.blocked_modules,
            "max_log_entries": job.max_log_entries,
            "max_output_chars": job.max_output_chars,
            "capture_budget": job.capture_budget(),
            "event_prefix": EVENT_PREFIX,
            "result_prefix": RESULT_PREFIX,
            "error_marker": ERROR_MARKER,
        });
        let stdout_capacity = job.stdout_capacity();

        self.instantiate_and_run(
            &config,
            job.source,
            Some(scratch.path()),
            job.timeout,
            job.max_memory_bytes,
            stdout_capacity,
        )
    }

    fn instantiate_and_run(
        &self,
        config: &serde_json::Value,
        stdin: String,
        scratch: Option<&Path>,
        timeout: Duration,
        max_memory_bytes: usize,
        stdout_capacity: usize,
    ) -> Result<RunCapture, SandboxError> {
        let stdout = MemoryOutputPipe::new(stdout_capacity);
        let stderr = MemoryOutputPipe::new(STDERR_CAPACITY);

        let mut builder = WasiCtxBuilder::new();
        builder
            .args(&["python", "-S", "-B", "-c", BOOTSTRAP])
            .env("LABRUN_PRELUDE", PRELUDE)
            .env("LABRUN_CONFIG", config.to_string())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(MemoryInputPipe::new(stdin.into_bytes()))
            .stdout(stdout.clone())
            .stderr(stderr.clone());

        if let Some(scratch) = scratch {
            builder
                .preopened_dir(scratch, SANDBOX_DIR, DirPerms::all(), FilePerms::all())
                .map_err(SandboxError::Execution)?;
        }
        if let Some(stdlib) = &self.options.stdlib_dir {
            builder
                .preopened_dir(stdlib, STDLIB_GUEST_DIR, DirPerms::READ, FilePerms::READ)
                .map_err(SandboxError::Execution)?;
        }

        let state = StoreState {
            wasi: builder.build_p1(),
            limiter: MemoryLimiter {
                max_bytes: max_memory_bytes,
                exceeded: false,
            },
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limiter);
        store.epoch_deadline_trap();
        store.set_epoch_deadline(deadline_ticks(timeout));

        let mut linker: Linker<StoreState> = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |state: &mut StoreState| &mut state.wasi)
            .map_err(SandboxError::Execution)?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| SandboxError::Interpreter(format!("instantiation failed: {e:#}")))?;
        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| SandboxError::Interpreter(format!("module has no _start export: {e}")))?;

        let exit = match start.call(&mut store, ()) {
            Ok(()) => Exit::Code(0),
            Err(e) if is_epoch_interrupt(&e) => Exit::Interrupted,
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(I32Exit(code)) => Exit::Code(*code),
                None => Exit::Trapped(format!("{e:#}")),
            },
        };

        let memory_usage_bytes = instance
            .get_memory(&mut store, "memory")
            .map(|memory| memory.data_size(&store) as u64);
        let memory_exceeded = store.data().limiter.exceeded;
        drop(store);

        let stdout = stdout.contents();
        let stderr = stderr.contents();

        Ok(RunCapture {
            capture: Capture::parse(&String::from_utf8_lossy(&stdout)),
            exit,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            memory_usage_bytes,
            memory_exceeded,
        })
    }
}

/// Advance the engine's epoch until the engine is dropped
fn spawn_epoch_ticker(engine: Weak<Engine>) -> Result<(), SandboxError> {
    std::thread::Builder::new()
        .name("labrun-epoch".to_string())
        .spawn(move || {
            while let Some(engine) = engine.upgrade() {
                engine.increment_epoch();
                drop(engine);
                std::thread::sleep(EPOCH_TICK);
            }
            tracing::debug!("Epoch ticker stopped");
        })
        .map(|_| ())
        .map_err(|e| SandboxError::InterpreterBoot(format!("failed to start epoch ticker: {e}")))
}

fn deadline_ticks(timeout: Duration) -> u64 {
    (timeout.as_millis() / EPOCH_TICK.as_millis()) as u64 + 1
}

/// Whether the error (or anything in its chain) is an epoch interrupt
fn is_epoch_interrupt(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.downcast_ref::<Trap>() == Some(&Trap::Interrupt))
}

/// Copy the project's Python files into the scratch directory.
///
/// Paths that would escape the directory, and files that cannot be written,
/// are skipped with a warning.
fn write_project_files(root: &Path, files: &FileMap) {
    for (path, content) in files {
        if detect_language(path) != Some(Language::Python) {
            continue;
        }
        let Some(relative) = normalize_relative_path(path) else {
            tracing::warn!(path = %path, "Skipping project file with unsafe path");
            continue;
        };

        let target = root.join(&relative);
        let written = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&target, content));
        if let Err(e) = written {
            tracing::warn!(path = %relative, error = %e, "Failed to write project file");
        }
    }
}

/// Last few lines of interpreter stderr, for boot diagnostics
fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(5);
    let text = lines[start..].join("\n");
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        text
    }
}
