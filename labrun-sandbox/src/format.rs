//! Error formatting: removes sandbox-internal frames from stack traces.
//!
//! Learners only see frames that point into their own files. Frames from the
//! JS prelude and deno_core extension scripts, and from the Python prelude and
//! import machinery, are dropped.

use regex::Regex;
use std::sync::LazyLock;

/// Script names used for code the runner injects into the isolate
pub const INTERNAL_SCRIPT_PREFIX: &str = "[labrun:";

/// File name under which the Python prelude is compiled
pub const PYTHON_PRELUDE_FILE: &str = "<labrun-prelude>";

static JS_INTERNAL_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s.*(\[labrun:|ext:|node:internal)").unwrap()
});

static JS_UNCAUGHT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Uncaught\s+)?(\(in promise\)\s+)?").unwrap());

static PY_FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(\s*)File "([^"]+)", line \d+"#).unwrap());

fn is_internal_python_file(file: &str) -> bool {
    file == PYTHON_PRELUDE_FILE
        || file == "<string>"
        || file.starts_with("<frozen importlib")
        || file.starts_with("<labrun")
}

/// Drop `at …` frames that point into runner-injected scripts
pub fn strip_internal_js_frames(stack: &str) -> String {
    stack
        .lines()
        .filter(|line| !JS_INTERNAL_FRAME_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize a JS error or stack for display.
///
/// Removes the `Uncaught` / `(in promise)` prefixes deno_core adds and the
/// internal frames.
pub fn format_js_error(error: &str) -> String {
    let stripped = strip_internal_js_frames(error.trim_end());
    JS_UNCAUGHT_PREFIX_RE.replace(&stripped, "").into_owned()
}

/// Drop traceback entries (the `File` line plus its source and caret lines)
/// that originate from the prelude or the import machinery.
pub fn strip_internal_python_frames(traceback: &str) -> String {
    let mut kept = Vec::new();
    let mut skip_indent: Option<usize> = None;

    for line in traceback.lines() {
        let indent = line.len() - line.trim_start().len();

        if let Some(frame_indent) = skip_indent {
            if indent > frame_indent && !line.trim().is_empty() {
                continue;
            }
            skip_indent = None;
        }

        if let Some(caps) = PY_FRAME_RE.captures(line) {
            if is_internal_python_file(&caps[2]) {
                skip_indent = Some(caps[1].len());
                continue;
            }
        }

        kept.push(line);
    }

    kept.join("\n")
}
