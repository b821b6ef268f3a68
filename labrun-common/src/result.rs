//! Execution result model shared by every runner

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Console method a log entry was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Info,
    Warn,
    Error,
}

impl LogKind {
    /// Whether entries of this kind count as ordinary (stdout-like) output
    pub fn is_output(self) -> bool {
        matches!(self, LogKind::Log | LogKind::Info)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::Log => "log",
            LogKind::Info => "info",
            LogKind::Warn => "warn",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" | "debug" | "trace" => Ok(LogKind::Log),
            "info" => Ok(LogKind::Info),
            "warn" => Ok(LogKind::Warn),
            "error" => Ok(LogKind::Error),
            other => Err(format!("unknown log kind '{other}'")),
        }
    }
}

/// One captured console call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    pub kind: LogKind,
    pub content: String,
    /// Unix epoch milliseconds at emission
    pub timestamp_ms: i64,
}

impl ConsoleLogEntry {
    pub fn new(kind: LogKind, content: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp_ms,
        }
    }

    /// Entry stamped with the current wall-clock time
    pub fn now(kind: LogKind, content: impl Into<String>) -> Self {
        Self::new(kind, content, chrono::Utc::now().timestamp_millis())
    }
}

/// Why a run did not succeed.
///
/// Lets a UI tell "fix your code" apart from "try a different environment".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The sandboxed program threw or raised
    UserCode,
    /// The run exceeded its time budget
    Timeout,
    /// The run was stopped by the host
    Stopped,
    /// The execution substrate failed (worker, interpreter boot, missing runtime)
    Sandbox,
}

/// Outcome of a single run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// True iff the run completed without an uncaught error and within limits
    pub success: bool,

    /// Ordinary output, truncated to the output-size limit
    pub output: String,

    /// Human-readable error with sandbox-internal frames removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock duration from invocation to completion or termination
    pub execution_time_ms: u64,

    /// Memory used by the execution context, when the runtime exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_bytes: Option<u64>,

    /// Captured console calls in emission order
    #[serde(default)]
    pub logs: Vec<ConsoleLogEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    /// Result for a run that failed before producing any output
    pub fn failed(kind: FailureKind, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            execution_time_ms: elapsed.as_millis() as u64,
            memory_usage_bytes: None,
            logs: Vec::new(),
            failure: Some(kind),
        }
    }

    /// Check if execution succeeded
    pub fn is_success(&self) -> bool {
        self.success && self.error.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }

    /// Entries of one kind, in emission order
    pub fn logs_of(&self, kind: LogKind) -> impl Iterator<Item = &ConsoleLogEntry> {
        self.logs.iter().filter(move |entry| entry.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result() {
        let result =
            ExecutionResult::failed(FailureKind::Sandbox, "worker error", Duration::from_millis(7));
        assert!(!result.is_success());
        assert_eq!(result.execution_time_ms, 7);
        assert_eq!(result.error.as_deref(), Some("worker error"));
        assert_eq!(result.failure, Some(FailureKind::Sandbox));
        assert!(result.logs.is_empty());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let result = ExecutionResult {
            success: true,
            output: "hi".to_string(),
            error: None,
            execution_time_ms: 3,
            memory_usage_bytes: Some(1024),
            logs: vec![ConsoleLogEntry::new(LogKind::Warn, "careful", 10)],
            failure: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["executionTimeMs"], 3);
        assert_eq!(json["memoryUsageBytes"], 1024);
        assert_eq!(json["logs"][0]["kind"], "warn");
        assert_eq!(json["logs"][0]["timestampMs"], 10);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_log_kind_parsing() {
        assert_eq!("debug".parse::<LogKind>(), Ok(LogKind::Log));
        assert_eq!("error".parse::<LogKind>(), Ok(LogKind::Error));
        assert!("table".parse::<LogKind>().is_err());
        assert!(LogKind::Info.is_output());
        assert!(!LogKind::Warn.is_output());
    }
}
