//! Lazily booted, process-wide interpreter instances.
//!
//! Booting downloads or reads the CPython module, compiles it and runs a health check,
//! which takes seconds. A cell makes sure that work happens at most once at a
//! time per [`BootOptions`]: concurrent callers await the same boot, a failed
//! boot is reported to every waiter and the next call starts over.

use super::interpreter::{BootOptions, PythonInterpreter};
use crate::config::InterpreterSource;
use crate::error::SandboxError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Instant;

type BootResult = Result<Arc<PythonInterpreter>, Arc<SandboxError>>;
type BootFuture = Shared<BoxFuture<'static, BootResult>>;

/// Observable boot state of an [`InterpreterCell`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpreterState {
    Uninitialized,
    Initializing,
    Ready,
    /// The last boot failed; the next call retries
    Failed,
}

enum CellState {
    Uninitialized,
    Initializing { generation: u64, boot: BootFuture },
    Ready(Arc<PythonInterpreter>),
    Failed(Arc<SandboxError>),
}

static CELLS: LazyLock<Mutex<HashMap<BootOptions, Arc<InterpreterCell>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

pub struct InterpreterCell {
    options: BootOptions,
    state: Mutex<CellState>,
    generation: Mutex<u64>,
}

impl InterpreterCell {
    /// A private cell, not shared with other runners
    pub fn new(options: BootOptions) -> Self {
        Self {
            options,
            state: Mutex::new(CellState::Uninitialized),
            generation: Mutex::new(0),
        }
    }

    /// The process-wide cell for `options`
    pub fn shared(options: BootOptions) -> Arc<Self> {
        let mut cells = CELLS.lock().unwrap_or_else(|e| e.into_inner());
        cells
            .entry(options.clone())
            .or_insert_with(|| Arc::new(Self::new(options)))
            .clone()
    }

    pub fn options(&self) -> &BootOptions {
        &self.options
    }

    pub fn state(&self) -> InterpreterState {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            CellState::Uninitialized => InterpreterState::Uninitialized,
            CellState::Initializing { .. } => InterpreterState::Initializing,
            CellState::Ready(_) => InterpreterState::Ready,
            CellState::Failed(_) => InterpreterState::Failed,
        }
    }

    /// Error of the last failed boot, if the cell is in [`InterpreterState::Failed`]
    pub fn last_error(&self) -> Option<Arc<SandboxError>> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            CellState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// The booted interpreter, booting it first if needed
    pub async fn get(&self) -> BootResult {
        let (generation, boot) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match &*state {
                CellState::Ready(interpreter) => return Ok(interpreter.clone()),
                CellState::Initializing { generation, boot } => (*generation, boot.clone()),
                CellState::Uninitialized | CellState::Failed(_) => {
                    let generation = self.next_generation();
                    let boot = start_boot(self.options.clone());
                    *state = CellState::Initializing {
                        generation,
                        boot: boot.clone(),
                    };
                    (generation, boot)
                }
            }
        };

        let result = boot.await;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = matches!(&*state, CellState::Initializing { generation: g, .. } if *g == generation);
        if current {
            *state = match &result {
                Ok(interpreter) => CellState::Ready(interpreter.clone()),
                Err(err) => CellState::Failed(err.clone()),
            };
        }
        result
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        *generation
    }
}

/// Run the boot on its own task so it survives callers that stop waiting
fn start_boot(options: BootOptions) -> BootFuture {
    let task = tokio::spawn(boot(options));
    async move {
        match task.await {
            Ok(result) => result.map_err(Arc::new),
            Err(e) => Err(Arc::new(SandboxError::InterpreterBoot(format!(
                "boot task failed: {e}"
            )))),
        }
    }
    .boxed()
    .shared()
}

async fn boot(options: BootOptions) -> Result<Arc<PythonInterpreter>, SandboxError> {
    let started = Instant::now();
    tracing::info!(source = %options.source, "Booting Python interpreter");

    match load_and_check(options).await {
        Ok((interpreter, version)) => {
            tracing::info!(
                version = %version.lines().next().unwrap_or_default(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Python interpreter ready"
            );
            Ok(Arc::new(interpreter))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Python interpreter boot failed");
            Err(err)
        }
    }
}

async fn load_and_check(options: BootOptions) -> Result<(PythonInterpreter, String), SandboxError> {
    let bytes = tokio::time::timeout(options.boot_timeout, load_module(&options.source))
        .await
        .map_err(|_| {
            SandboxError::InterpreterBoot(format!(
                "loading {} took longer than {}ms",
                options.source,
                options.boot_timeout.as_millis()
            ))
        })??;
    tracing::debug!(bytes = bytes.len(), "Interpreter module loaded");

    tokio::task::spawn_blocking(move || {
        let interpreter = PythonInterpreter::compile(&bytes, options)?;
        let version = interpreter.health_check()?;
        Ok((interpreter, version))
    })
    .await
    .map_err(|e| SandboxError::InterpreterBoot(format!("boot task failed: {e}")))?
}

async fn load_module(source: &InterpreterSource) -> Result<Vec<u8>, SandboxError> {
    match source {
        InterpreterSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
            SandboxError::InterpreterBoot(format!("cannot read {}: {e}", path.display()))
        }),
        InterpreterSource::Url(url) => {
            let fetch_error =
                |e: reqwest::Error| SandboxError::InterpreterBoot(format!("cannot fetch {url}: {e}"));
            let response = reqwest::get(url.clone())
                .await
                .and_then(|r| r.error_for_status())
                .map_err(fetch_error)?;
            let bytes = response.bytes().await.map_err(fetch_error)?;
            Ok(bytes.to_vec())
        }
    }
}
