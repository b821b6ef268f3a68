//! Wire format between the Python prelude and the host.
//!
//! The prelude writes one line per captured write to the real stdout, prefixed
//! with [`EVENT_PREFIX`], and a final [`RESULT_PREFIX`] line once the run
//! finishes. Event lines survive an epoch interrupt, the result line does not.

use labrun_common::{ConsoleLogEntry, LogCollector, LogKind};
use serde::Deserialize;

pub(crate) const EVENT_PREFIX: &str = "__labrun_event__:";
pub(crate) const RESULT_PREFIX: &str = "__labrun_result__:";

/// Prefix of the captured-stderr write that carries an uncaught exception
pub(crate) const ERROR_MARKER: &str = "__LABRUN_ERROR__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct CaptureEvent {
    pub stream: Stream,
    pub text: String,
    pub ts: i64,
    /// stdout written past the log cap; part of the output, not a log entry
    #[serde(default)]
    pub output_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct RunSummary {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub dropped: usize,
    #[serde(default)]
    pub version: Option<String>,
}

/// Everything decoded from the guest's real stdout
#[derive(Debug, Default)]
pub(crate) struct Capture {
    pub events: Vec<CaptureEvent>,
    pub summary: Option<RunSummary>,
}

impl Capture {
    pub fn parse(stdout: &str) -> Self {
        let mut capture = Capture::default();
        for line in stdout.lines() {
            if let Some(json) = line.strip_prefix(EVENT_PREFIX) {
                match serde_json::from_str(json) {
                    Ok(event) => capture.events.push(event),
                    Err(e) => tracing::warn!(error = %e, "Malformed capture event"),
                }
            } else if let Some(json) = line.strip_prefix(RESULT_PREFIX) {
                match serde_json::from_str(json) {
                    Ok(summary) => capture.summary = Some(summary),
                    Err(e) => tracing::warn!(error = %e, "Malformed run summary"),
                }
            }
        }
        capture
    }

    /// Split events into ordinary output, console entries and the uncaught error.
    ///
    /// stdout writes become `log` entries, stderr writes `warn` entries, and
    /// the marked error an `error` entry carrying the exception line. Every
    /// stdout write lands in the output, including those past the log cap.
    pub fn into_logs(self, logs: &mut LogCollector) -> (String, Option<String>) {
        let mut output = String::new();
        let mut error = None;

        for event in self.events {
            let content = event.text.strip_suffix('\n').unwrap_or(&event.text);
            match event.stream {
                Stream::Stdout => {
                    output.push_str(&event.text);
                    if !event.output_only {
                        logs.push(ConsoleLogEntry::new(LogKind::Log, content, event.ts));
                    }
                }
                Stream::Stderr => match content.strip_prefix(ERROR_MARKER) {
                    Some(traceback) => {
                        let traceback = traceback.trim_start_matches('\n').trim_end();
                        let headline = traceback.lines().last().unwrap_or_default();
                        logs.push(ConsoleLogEntry::new(LogKind::Error, headline, event.ts));
                        error = Some(traceback.to_string());
                    }
                    None => logs.push(ConsoleLogEntry::new(LogKind::Warn, content, event.ts)),
                },
            }
        }

        if let Some(summary) = &self.summary {
            let last = logs.entries().last().map_or(0, |e| e.timestamp_ms);
            logs.record_dropped(summary.dropped, last);
        }

        (output, error)
    }
}
