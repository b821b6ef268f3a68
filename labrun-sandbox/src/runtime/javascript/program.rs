//! Program synthesis: prelude, sibling scripts and the wrapped entry script

use super::typescript::{strip_with_line_map, LineMap};
use crate::error::SandboxError;
use crate::format::INTERNAL_SCRIPT_PREFIX;
use crate::policy::SandboxPolicy;
use labrun_common::{detect_language, sibling_sources, FileMap, Language};
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Name the entry script runs under when the host gives none
pub const DEFAULT_ENTRY_NAME: &str = "main.js";

// `[^;]` spans newlines so multi-line specifier lists are matched whole
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import[ \t]*(?:[\w*{$][^;]*?[ \t\n]from[ \t]*)?['"][^'"\n]*['"][ \t]*;?"#)
        .unwrap()
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*export[ \t]*(?:\*|\{[^}]*\})(?:[ \t]*from[ \t]*['"][^'"\n]*['"])?[ \t]*;?"#)
        .unwrap()
});

static EXPORT_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)export[ \t]+(?:default[ \t]+)?").unwrap());

/// One classic script evaluated in the isolate
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Script {
    pub name: String,
    pub code: String,
    /// Present when `code` was rewritten by the TypeScript stripper
    pub line_map: Option<LineMap>,
}

/// Everything the worker evaluates, in order
#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub prelude: Script,
    pub siblings: Vec<Script>,
    pub entry: Script,
}

impl Program {
    /// Point stack positions in stripped TypeScript back at the learner's source
    pub fn remap_stack(&self, stack: &str) -> String {
        self.siblings
            .iter()
            .chain(std::iter::once(&self.entry))
            .filter_map(|script| Some((script.name.as_str(), script.line_map.as_ref()?)))
            .fold(stack.to_string(), |stack, (name, map)| map.remap_stack(name, &stack))
    }
}

/// Blank out a match while keeping its line count
fn keep_newlines(caps: &Captures) -> String {
    "\n".repeat(caps[0].matches('\n').count())
}

/// Turn an ES module into a classic script that shares the global scope.
///
/// Import declarations are removed, export lists are dropped and `export`
/// keywords stripped. Line numbers are preserved.
pub(crate) fn flatten_module(source: &str) -> String {
    let without_imports = IMPORT_RE.replace_all(source, keep_newlines);
    let without_lists = EXPORT_LIST_RE.replace_all(&without_imports, keep_newlines);
    EXPORT_KEYWORD_RE
        .replace_all(&without_lists, "$1")
        .into_owned()
}

fn transpile(source: &str, language: Language) -> Result<(String, Option<LineMap>), SandboxError> {
    let flat = flatten_module(source);
    if language == Language::TypeScript {
        let (code, line_map) = strip_with_line_map(&flat)?;
        Ok((code, Some(line_map)))
    } else {
        Ok((flat, None))
    }
}

const ENTRY_OPEN: &str = "(async () => { try { ";

/// Wrap the entry code so uncaught errors are recorded before rethrowing.
///
/// The opening wrapper sits on the first line so user line numbers survive.
fn wrap_entry(code: &str) -> String {
    format!(
        "{ENTRY_OPEN}{code}\n}} catch (__labrunError) {{ __labrun.fail(__labrunError); throw __labrunError; }} }})();"
    )
}

pub(crate) fn build_prelude(policy: &SandboxPolicy) -> Script {
    // A set of strings always serializes
    let blocked_json =
        serde_json::to_string(&policy.blocked_capabilities).unwrap_or_else(|_| "[]".to_string());

    Script {
        name: format!("{INTERNAL_SCRIPT_PREFIX}prelude]"),
        code: PRELUDE_JS.replace("__BLOCKED_CAPABILITIES__", &blocked_json),
        line_map: None,
    }
}

/// Build the full program for `source` run as `language`.
///
/// Same-scope siblings from `files` run before the entry, each as its own
/// script so stack frames keep their file names. The file at the entry path,
/// [`DEFAULT_ENTRY_NAME`] when none is given, is never a sibling.
pub(crate) fn build_program(
    policy: &SandboxPolicy,
    language: Language,
    entry_name: Option<&str>,
    source: &str,
    files: &FileMap,
) -> Result<Program, SandboxError> {
    let entry_name = entry_name.unwrap_or(DEFAULT_ENTRY_NAME);
    let mut siblings = Vec::new();
    for (path, text) in sibling_sources(files, language, entry_name) {
        let sibling_language = detect_language(path).unwrap_or(language);
        let (code, line_map) = transpile(text, sibling_language)?;
        siblings.push(Script {
            name: path.to_string(),
            code,
            line_map,
        });
    }

    let (code, mut line_map) = transpile(source, language)?;
    if let Some(map) = line_map.as_mut() {
        map.shift_first_line(ENTRY_OPEN.chars().count() as u32);
    }
    let entry = Script {
        name: entry_name.to_string(),
        code: wrap_entry(&code),
        line_map,
    };

    Ok(Program {
        prelude: build_prelude(policy),
        siblings,
        entry,
    })
}

/// Installs the recording console, the failure hook, and removes blocked globals.
///
/// Runs before any user script; `Deno.core.ops` is captured first since
/// `Deno` itself is on the block list.
const PRELUDE_JS: &str = r#"((ops, blocked) => {
    const logOp = ops.op_labrun_log;
    const errorOp = ops.op_labrun_error;

    const describe = (value) => {
        if (typeof value === 'string') return value;
        if (value instanceof Error) return value.stack || String(value);
        if (value === undefined || typeof value === 'function' || typeof value === 'symbol') {
            return String(value);
        }
        if (typeof value === 'bigint') return `${value}n`;
        try {
            const json = JSON.stringify(value);
            return json === undefined ? String(value) : json;
        } catch (_) {
            return String(value);
        }
    };
    const format = (args) => args.map(describe).join(' ');
    const emit = (kind) => (...args) => logOp(kind, format(args));

    const sandboxConsole = Object.freeze({
        log: emit('log'),
        info: emit('info'),
        warn: emit('warn'),
        error: emit('error'),
        debug: emit('log'),
        trace: emit('log'),
    });
    Object.defineProperty(globalThis, 'console', {
        value: sandboxConsole, writable: false, configurable: false, enumerable: false,
    });

    Object.defineProperty(globalThis, '__labrun', {
        value: Object.freeze({
            fail: (error) => {
                logOp('error', String(error));
                errorOp(error && error.stack ? String(error.stack) : String(error));
            },
        }),
        writable: false, configurable: false, enumerable: false,
    });

    const neuterConstructor = (fn) => {
        try {
            Object.defineProperty(Object.getPrototypeOf(fn), 'constructor', {
                value: undefined, writable: false, configurable: false,
            });
        } catch (_) {}
    };
    if (blocked.includes('Function') || blocked.includes('eval')) {
        neuterConstructor(function () {});
        neuterConstructor(async function () {});
        neuterConstructor(function* () {});
        neuterConstructor(async function* () {});
    }

    for (const name of blocked) {
        try { delete globalThis[name]; } catch (_) {}
        if (name in globalThis) {
            try {
                Object.defineProperty(globalThis, name, {
                    value: undefined, writable: false, configurable: false,
                });
            } catch (_) {}
        }
    }
})(Deno.core.ops, __BLOCKED_CAPABILITIES__);"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_removes_imports_and_exports() {
        let source = "import { helper } from './util.js';\nimport './side-effect.js';\nexport function run() {\n  return helper();\n}\nexport default run;\nexport { run as start };\nconst important = 1;";
        let flat = flatten_module(source);

        assert_eq!(
            flat,
            "\n\nfunction run() {\n  return helper();\n}\nrun;\n\nconst important = 1;"
        );
        assert_eq!(flat.lines().count(), source.lines().count());
    }

    #[test]
    fn test_flatten_multiline_import_keeps_line_count() {
        let source = "import {\n  a,\n  b,\n} from './lib.js';\nconsole.log(a, b);";
        let flat = flatten_module(source);
        assert_eq!(flat, "\n\n\n\nconsole.log(a, b);");
    }

    #[test]
    fn test_entry_wrapper_keeps_first_line() {
        let program = build_program(
            &SandboxPolicy::default(),
            Language::JavaScript,
            None,
            "console.log(1);\nconsole.log(2);",
            &FileMap::new(),
        )
        .unwrap();

        let first = program.entry.code.lines().next().unwrap();
        assert!(first.starts_with("(async () => { try { console.log(1);"));
        assert_eq!(program.entry.code.lines().nth(1), Some("console.log(2);"));
        assert_eq!(program.entry.name, DEFAULT_ENTRY_NAME);
    }

    #[test]
    fn test_siblings_exclude_entry_and_other_languages() {
        let mut files = FileMap::new();
        files.insert("main.js".into(), "run();".into());
        files.insert("util.js".into(), "export function run() {}".into());
        files.insert("helper.py".into(), "def run(): pass".into());

        let program = build_program(
            &SandboxPolicy::default(),
            Language::JavaScript,
            Some("main.js"),
            "run();",
            &files,
        )
        .unwrap();

        assert_eq!(program.siblings.len(), 1);
        assert_eq!(program.siblings[0].name, "util.js");
        assert_eq!(program.siblings[0].code, "function run() {}");
        assert_eq!(program.entry.name, "main.js");
    }

    #[test]
    fn test_siblings_match_entry_by_path_not_text() {
        let mut files = FileMap::new();
        files.insert("main.js".into(), "console.log('stale copy');".into());
        files.insert("same.js".into(), "console.log('twice');".into());

        let program = build_program(
            &SandboxPolicy::default(),
            Language::JavaScript,
            Some("main.js"),
            "console.log('twice');",
            &files,
        )
        .unwrap();

        let names: Vec<_> = program.siblings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["same.js"]);

        let program = build_program(
            &SandboxPolicy::default(),
            Language::JavaScript,
            None,
            "console.log('unsaved');",
            &files,
        )
        .unwrap();
        let names: Vec<_> = program.siblings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["same.js"]);
    }

    #[test]
    fn test_typescript_stack_positions_are_remapped() {
        let source = "interface Shape {\n  area(): number;\n}\n\nfunction check(s: Shape): void {\n  throw new Error('bad shape');\n}\ncheck({ area: () => 1 });";
        let program = build_program(
            &SandboxPolicy::default(),
            Language::TypeScript,
            Some("shapes.ts"),
            source,
            &FileMap::new(),
        )
        .unwrap();

        let (index, text) = program
            .entry
            .code
            .lines()
            .enumerate()
            .find(|(_, line)| line.contains("throw new Error"))
            .unwrap();
        let col = text.find("throw").unwrap() + 1;
        let stack = format!("Error: bad shape\n    at check (shapes.ts:{}:{col})", index + 1);

        let remapped = program.remap_stack(&stack);
        assert!(remapped.contains("(shapes.ts:6:"), "{remapped}");
        assert_eq!(program.remap_stack("at main.js:3:1"), "at main.js:3:1");
    }

    #[test]
    fn test_prelude_lists_blocked_capabilities() {
        let prelude = build_prelude(&SandboxPolicy::default());
        assert!(prelude.name.starts_with(INTERNAL_SCRIPT_PREFIX));
        assert!(prelude.code.contains(r#""fetch""#));
        assert!(!prelude.code.contains("__BLOCKED_CAPABILITIES__"));
    }
}
