//! JavaScript and TypeScript runner on single-use V8 workers

mod ops;
mod program;
mod typescript;
mod worker;

use self::program::build_program;
use self::worker::{spawn_worker, terminate, IsolateSlot, WorkerEvent, WorkerJob, WorkerOutcome};
use super::{finish_result, sandbox_failure, LanguageRunner};
use crate::error::SandboxError;
use crate::policy::SandboxPolicy;
use async_trait::async_trait;
use labrun_common::{
    ConsoleLogEntry, ExecutionResult, FailureKind, FileMap, Language, LogCollector, LogKind, OutputBuffer,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use typescript::strip_typescript_types;

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Runs JavaScript, or TypeScript after type stripping, in a fresh isolate per run.
///
/// At most one worker is live per runner: starting a run stops the previous one.
pub struct JavaScriptRunner {
    language: Language,
    policy: SandboxPolicy,
    active: Mutex<Option<ActiveRun>>,
    next_run: AtomicU64,
}

impl JavaScriptRunner {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self::for_language(Language::JavaScript, policy)
    }

    pub fn typescript(policy: SandboxPolicy) -> Self {
        Self::for_language(Language::TypeScript, policy)
    }

    fn for_language(language: Language, policy: SandboxPolicy) -> Self {
        Self {
            language,
            policy,
            active: Mutex::new(None),
            next_run: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    fn begin_run(&self) -> (u64, CancellationToken) {
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(ActiveRun {
                id,
                cancel: cancel.clone(),
            });
        if let Some(previous) = previous {
            tracing::debug!("Stopping previous run before starting a new one");
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    fn end_run(&self, id: u64) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
        }
    }

    async fn run(&self, entry_name: Option<&str>, source: &str, files: &FileMap) -> ExecutionResult {
        let started = Instant::now();
        let mut logs = LogCollector::new(self.policy.max_log_entries);
        let mut output = OutputBuffer::new(self.policy.max_output_bytes);

        let program = match build_program(&self.policy, self.language, entry_name, source, files) {
            Ok(program) => program,
            Err(err) => {
                logs.push(ConsoleLogEntry::now(LogKind::Error, err.to_string()));
                return finish_result(
                    &self.policy,
                    started,
                    logs,
                    "",
                    Some((err.failure_kind(), err.to_string())),
                    None,
                );
            }
        };

        let (run_id, cancel) = self.begin_run();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let slot: IsolateSlot = Arc::new(Mutex::new(None));
        let job = WorkerJob {
            program,
            max_heap_bytes: self.policy.max_heap_bytes,
            max_log_entries: self.policy.max_log_entries,
            max_entry_chars: self.policy.max_output_bytes,
            max_output_chars: self.policy.max_output_bytes,
        };

        // The handle is dropped; a terminated worker exits on its own
        if let Err(e) = spawn_worker(job, events_tx, slot.clone(), cancel.clone()) {
            self.end_run(run_id);
            let err = SandboxError::Worker(format!("failed to spawn worker thread: {e}"));
            tracing::warn!(error = %err, "JavaScript worker unavailable");
            return sandbox_failure(started, &err);
        }

        let deadline = tokio::time::sleep(self.policy.timeout);
        tokio::pin!(deadline);

        let settled = loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event @ (WorkerEvent::Log(_) | WorkerEvent::Output(_))) => {
                        collect(event, &mut logs, &mut output)
                    }
                    Some(WorkerEvent::Finished(outcome)) => break Ok(outcome),
                    None => break Err(SandboxError::Worker(
                        "worker exited without reporting a result".to_string(),
                    )),
                },
                _ = cancel.cancelled() => break Err(SandboxError::Stopped),
                _ = &mut deadline => break Err(SandboxError::Timeout {
                    timeout_ms: self.policy.timeout_ms(),
                }),
            }
        };
        self.end_run(run_id);

        match settled {
            Ok(outcome) => self.complete(started, logs, output, outcome),
            Err(err) => {
                cancel.cancel();
                terminate(&slot);
                // Entries already queued before termination are kept
                while let Ok(event) = events.try_recv() {
                    collect(event, &mut logs, &mut output);
                }
                tracing::debug!(error = %err, "Worker terminated");

                finish_result(
                    &self.policy,
                    started,
                    logs,
                    output.as_str(),
                    Some((err.failure_kind(), err.to_string())),
                    None,
                )
            }
        }
    }

    fn complete(
        &self,
        started: Instant,
        mut logs: LogCollector,
        output: OutputBuffer,
        outcome: WorkerOutcome,
    ) -> ExecutionResult {
        logs.record_dropped(outcome.dropped_logs, outcome.last_timestamp_ms);

        let failure = if outcome.heap_exhausted {
            let err = SandboxError::MemoryLimit;
            Some((err.failure_kind(), err.to_string()))
        } else if let Some(fault) = outcome.fault {
            let err = SandboxError::Worker(fault);
            tracing::warn!(error = %err, "JavaScript worker fault");
            Some((err.failure_kind(), err.to_string()))
        } else if let Some(error) = outcome.error {
            if !outcome.error_logged {
                let headline = error.lines().next().unwrap_or_default().to_string();
                let timestamp_ms = chrono::Utc::now()
                    .timestamp_millis()
                    .max(outcome.last_timestamp_ms);
                logs.push(ConsoleLogEntry::new(LogKind::Error, headline, timestamp_ms));
            }
            Some((FailureKind::UserCode, error))
        } else {
            None
        };

        finish_result(
            &self.policy,
            started,
            logs,
            output.as_str(),
            failure,
            outcome.memory_usage_bytes,
        )
    }
}

fn collect(event: WorkerEvent, logs: &mut LogCollector, output: &mut OutputBuffer) {
    match event {
        WorkerEvent::Log(entry) => {
            if entry.kind.is_output() {
                output.push_line(&entry.content);
            }
            logs.push(entry);
        }
        WorkerEvent::Output(text) => output.push_line(&text),
        WorkerEvent::Finished(_) => {}
    }
}

#[async_trait]
impl LanguageRunner for JavaScriptRunner {
    async fn execute(&self, source: &str, files: &FileMap) -> ExecutionResult {
        self.run(None, source, files).await
    }

    async fn execute_file(&self, path: &str, source: &str, files: &FileMap) -> ExecutionResult {
        self.run(Some(path), source, files).await
    }

    fn stop(&self) {
        if let Some(run) = self.active.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tracing::debug!("Stopping JavaScript run");
            run.cancel.cancel();
        }
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn language(&self) -> Language {
        self.language
    }

    fn name(&self) -> &str {
        "v8"
    }
}
