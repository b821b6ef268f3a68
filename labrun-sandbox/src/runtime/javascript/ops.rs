//! deno_core ops backing the sandbox console.
//!
//! The `#[op2]` macro generates items that cannot carry doc comments.
#![allow(missing_docs)]

use super::worker::WorkerEvent;
use deno_core::{op2, Extension, OpState};
use labrun_common::{truncate_output, ConsoleLogEntry, LogKind};
use tokio::sync::mpsc::UnboundedSender;

/// Forwards console entries to the host as they are emitted.
///
/// Past the entry cap, output-kind calls are still forwarded as bare output
/// text until the output limit is exceeded.
pub(crate) struct LogSink {
    events: UnboundedSender<WorkerEvent>,
    max_entries: usize,
    max_entry_chars: usize,
    max_output_chars: usize,
    sent: usize,
    dropped: usize,
    output_chars: usize,
    last_timestamp_ms: i64,
}

impl LogSink {
    pub(crate) fn new(
        events: UnboundedSender<WorkerEvent>,
        max_entries: usize,
        max_entry_chars: usize,
        max_output_chars: usize,
    ) -> Self {
        Self {
            events,
            max_entries,
            max_entry_chars,
            max_output_chars,
            sent: 0,
            dropped: 0,
            output_chars: 0,
            last_timestamp_ms: 0,
        }
    }

    fn record(&mut self, kind: LogKind, content: &str) {
        // Wall clock may step backwards; entries must not
        let timestamp_ms = chrono::Utc::now()
            .timestamp_millis()
            .max(self.last_timestamp_ms);
        self.last_timestamp_ms = timestamp_ms;

        let content = truncate_output(content, self.max_entry_chars);
        let output_full = self.output_chars > self.max_output_chars;
        if kind.is_output() {
            self.output_chars = self.output_chars.saturating_add(content.chars().count() + 1);
        }

        if self.sent >= self.max_entries {
            self.dropped += 1;
            if kind.is_output() && !output_full {
                self.send(WorkerEvent::Output(content));
            }
            return;
        }

        self.send(WorkerEvent::Log(ConsoleLogEntry::new(kind, content, timestamp_ms)));
        self.sent += 1;
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("log receiver dropped, discarding entry");
        }
    }

    pub(crate) fn dropped(&self) -> (usize, i64) {
        (self.dropped, self.last_timestamp_ms)
    }
}

/// Uncaught error recorded by the entry wrapper
pub(crate) struct UserError(pub String);

/// Record one console call.
#[op2(fast)]
pub fn op_labrun_log(state: &mut OpState, #[string] kind: &str, #[string] content: &str) {
    let kind = kind.parse().unwrap_or(LogKind::Log);
    if let Some(sink) = state.try_borrow_mut::<LogSink>() {
        sink.record(kind, content);
    }
}

/// Record the uncaught error of the entry script.
#[op2(fast)]
pub fn op_labrun_error(state: &mut OpState, #[string] error: &str) {
    state.put(UserError(error.to_string()));
}

/// Create the sandbox extension
pub(crate) fn labrun_extension() -> Extension {
    let ops = vec![op_labrun_log(), op_labrun_error()];

    Extension {
        name: "labrun_sandbox",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}
