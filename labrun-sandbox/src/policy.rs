//! Sandbox policy shared by every runner

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Globals sandboxed code may use
pub const DEFAULT_ALLOWED_CAPABILITIES: &[&str] = &[
    "console", "Math", "Date", "JSON", "Array", "Object", "String", "Number",
];

/// Globals removed before any user code runs
pub const DEFAULT_BLOCKED_CAPABILITIES: &[&str] = &[
    // network
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "EventSource",
    "Request",
    "Response",
    "Headers",
    // storage
    "localStorage",
    "sessionStorage",
    "indexedDB",
    "caches",
    // navigation
    "location",
    "navigator",
    "open",
    "close",
    "history",
    // dynamic evaluation
    "eval",
    "Function",
    // timers
    "setTimeout",
    "setInterval",
    "setImmediate",
    "queueMicrotask",
    // cross-realm references
    "self",
    "window",
    "parent",
    "top",
    "postMessage",
    "importScripts",
    "Deno",
    "SharedArrayBuffer",
    "Atomics",
    "WebAssembly",
];

/// Python modules user code may not import
pub const DEFAULT_BLOCKED_MODULES: &[&str] = &[
    // process control
    "subprocess",
    "pty",
    "signal",
    "resource",
    // sockets and network protocols
    "socket",
    "ssl",
    "select",
    "selectors",
    "asyncio",
    "http",
    "urllib",
    "ftplib",
    "smtplib",
    "poplib",
    "imaplib",
    "telnetlib",
    "xmlrpc",
    "socketserver",
    "webbrowser",
    // native code and concurrency
    "ctypes",
    "threading",
    "_thread",
    "multiprocessing",
    "concurrent",
    // pickle family
    "pickle",
    "_pickle",
    "cPickle",
    "shelve",
    "marshal",
    "copyreg",
    "dill",
];

fn string_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Execution limits and capability lists.
///
/// Constructed once per runner and never mutated during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Wall-clock budget for a single run
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Output length limit, counted in characters
    pub max_output_bytes: usize,

    pub max_log_entries: usize,

    pub allowed_capabilities: BTreeSet<String>,

    pub blocked_capabilities: BTreeSet<String>,

    pub blocked_modules: BTreeSet<String>,

    /// V8 heap ceiling
    pub max_heap_bytes: usize,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            max_output_bytes: 100_000,
            max_log_entries: 1000,
            allowed_capabilities: string_set(DEFAULT_ALLOWED_CAPABILITIES),
            blocked_capabilities: string_set(DEFAULT_BLOCKED_CAPABILITIES),
            blocked_modules: string_set(DEFAULT_BLOCKED_MODULES),
            max_heap_bytes: 64 * 1024 * 1024,
        }
    }
}

impl SandboxPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    pub fn with_max_heap_bytes(mut self, max: usize) -> Self {
        self.max_heap_bytes = max;
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Check the invariants a runner relies on
    pub fn validate(&self) -> Result<(), PolicyError> {
        let conflicts: Vec<String> = self
            .allowed_capabilities
            .intersection(&self.blocked_capabilities)
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(PolicyError::CapabilityConflict(conflicts));
        }

        if self.timeout.is_zero() {
            return Err(PolicyError::InvalidLimit {
                field: "timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_heap_bytes < 4 * 1024 * 1024 {
            return Err(PolicyError::InvalidLimit {
                field: "max_heap_bytes",
                reason: "must be at least 4 MiB".to_string(),
            });
        }

        Ok(())
    }

    pub fn is_capability_blocked(&self, name: &str) -> bool {
        self.blocked_capabilities.contains(name)
    }

    /// Whether `module` or any of its parent packages is blocked
    pub fn is_module_blocked(&self, module: &str) -> bool {
        let mut prefix = module;
        loop {
            if self.blocked_modules.contains(prefix) {
                return true;
            }
            match prefix.rfind('.') {
                Some(idx) => prefix = &prefix[..idx],
                None => return false,
            }
        }
    }
}
