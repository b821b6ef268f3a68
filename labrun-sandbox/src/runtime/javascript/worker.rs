//! Single-use V8 worker.
//!
//! Each run gets a dedicated OS thread with its own current-thread tokio
//! runtime and a fresh isolate. The thread publishes its isolate handle so the
//! host can terminate execution from outside, and reports console entries and
//! its final outcome over an unbounded channel.

use super::ops::{labrun_extension, LogSink, UserError};
use super::program::Program;
use crate::format::format_js_error;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use labrun_common::ConsoleLogEntry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Isolate handle published by the worker once its isolate exists
pub(crate) type IsolateSlot = Arc<Mutex<Option<v8::IsolateHandle>>>;

pub(crate) enum WorkerEvent {
    Log(ConsoleLogEntry),
    /// Console output past the entry cap; feeds `output` only
    Output(String),
    Finished(WorkerOutcome),
}

/// Final report of a worker
#[derive(Debug, Default)]
pub(crate) struct WorkerOutcome {
    /// Uncaught error from user code, already formatted
    pub error: Option<String>,
    /// Whether the entry wrapper already logged `error` as a console entry
    pub error_logged: bool,
    /// Internal failure of the worker itself
    pub fault: Option<String>,
    pub heap_exhausted: bool,
    pub memory_usage_bytes: Option<u64>,
    pub dropped_logs: usize,
    pub last_timestamp_ms: i64,
}

pub(crate) struct WorkerJob {
    pub program: Program,
    pub max_heap_bytes: usize,
    pub max_log_entries: usize,
    pub max_entry_chars: usize,
    pub max_output_chars: usize,
}

/// State for the near-heap-limit callback
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// V8 near-heap-limit callback. Terminates execution and grants 1MB grace
/// for the termination to propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the boxed HeapLimitState in `run_job`, which is
    // dropped only after the runtime owning the isolate.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Terminate the isolate published in `slot`, if any
pub(crate) fn terminate(slot: &IsolateSlot) {
    if let Ok(guard) = slot.lock() {
        if let Some(handle) = guard.as_ref() {
            handle.terminate_execution();
        }
    }
}

/// Start a worker thread for `job`.
///
/// Fails only when the thread itself cannot be spawned; everything after
/// that is reported through `events`. The sender is dropped when the thread
/// exits, so `events` closing means the worker is gone.
pub(crate) fn spawn_worker(
    job: WorkerJob,
    events: UnboundedSender<WorkerEvent>,
    slot: IsolateSlot,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("labrun-js-worker".to_string())
        .spawn(move || {
            let outcome = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(run_job(job, &events, &slot, &cancel)),
                Err(e) => WorkerOutcome {
                    fault: Some(format!("failed to start worker runtime: {e}")),
                    ..Default::default()
                },
            };

            if events.send(WorkerEvent::Finished(outcome)).is_err() {
                tracing::debug!("worker result receiver dropped before result was sent");
            }
        })
}

enum ScriptFailure {
    User(String),
    Internal(String),
}

async fn run_job(
    job: WorkerJob,
    events: &UnboundedSender<WorkerEvent>,
    slot: &IsolateSlot,
    cancel: &CancellationToken,
) -> WorkerOutcome {
    let create_params = v8::CreateParams::default().heap_limits(0, job.max_heap_bytes);
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![labrun_extension()],
        create_params: Some(create_params),
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(LogSink::new(
        events.clone(),
        job.max_log_entries,
        job.max_entry_chars,
        job.max_output_chars,
    ));

    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    if let Ok(mut guard) = slot.lock() {
        *guard = Some(runtime.v8_isolate().thread_safe_handle());
    }

    let mut outcome = WorkerOutcome::default();
    // The host may have given up before the handle was published
    if cancel.is_cancelled() {
        tracing::debug!("worker cancelled before start");
    } else {
        match run_program(&mut runtime, &job.program).await {
            Ok(()) => {}
            Err(ScriptFailure::User(error)) => outcome.error = Some(error),
            Err(ScriptFailure::Internal(fault)) => outcome.fault = Some(fault),
        }
    }

    if let Ok(mut guard) = slot.lock() {
        *guard = None;
    }

    outcome.heap_exhausted = heap_state.triggered.load(Ordering::SeqCst);

    {
        let state = runtime.op_state();
        let state = state.borrow();
        if let Some(UserError(recorded)) = state.try_borrow::<UserError>() {
            // The wrapper's record carries the full stack
            outcome.error = Some(job.program.remap_stack(&format_js_error(recorded)));
            outcome.error_logged = true;
        }
        if let Some(sink) = state.try_borrow::<LogSink>() {
            let (dropped, last) = sink.dropped();
            outcome.dropped_logs = dropped;
            outcome.last_timestamp_ms = last;
        }
    }

    if !outcome.heap_exhausted {
        let mut stats = v8::HeapStatistics::default();
        runtime.v8_isolate().get_heap_statistics(&mut stats);
        outcome.memory_usage_bytes = Some(stats.used_heap_size() as u64);
    }

    drop(runtime);
    drop(heap_state);

    outcome
}

fn user_failure(program: &Program, error: &str) -> ScriptFailure {
    ScriptFailure::User(program.remap_stack(&format_js_error(error)))
}

async fn run_program(runtime: &mut JsRuntime, program: &Program) -> Result<(), ScriptFailure> {
    runtime
        .execute_script(program.prelude.name.clone(), program.prelude.code.clone())
        .map_err(|e| ScriptFailure::Internal(format!("prelude failed: {e}")))?;
    tracing::debug!(siblings = program.siblings.len(), "Prelude installed");

    for script in program.siblings.iter().chain(std::iter::once(&program.entry)) {
        runtime
            .execute_script(script.name.clone(), script.code.clone())
            .map_err(|e| user_failure(program, &e.to_string()))?;
    }

    runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| user_failure(program, &e.to_string()))
}
