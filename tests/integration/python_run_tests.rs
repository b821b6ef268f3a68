//! Python projects against a real interpreter.
//!
//! Set `LABRUN_PYTHON_WASM` to a CPython WASI module and run with `--ignored`.

use labrun_common::OUTPUT_TRUNCATED_MARKER;
use labrun_sandbox::{FailureKind, Language, LogKind, ProjectRunner, RunnerFactory, SandboxPolicy};
use labrun_tests::{project, python_from_env, setup_test_logging};

const NEEDS_INTERPRETER: &str = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module";

fn host(policy: SandboxPolicy) -> Option<ProjectRunner> {
    let python = python_from_env()?;
    Some(ProjectRunner::new(RunnerFactory::new(policy, python).unwrap()))
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_project_package_imports() {
    setup_test_logging();
    let Some(host) = host(SandboxPolicy::default()) else {
        eprintln!("skipped: {NEEDS_INTERPRETER}");
        return;
    };
    let files = project(&[
        ("main.py", "from shapes.square import area\nprint(area(4))"),
        ("shapes/__init__.py", ""),
        ("shapes/square.py", "def area(side):\n    return side * side\n"),
    ]);

    let result = host.run_file("main.py", &files).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "16\n");
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_stderr_is_captured_as_warnings() {
    setup_test_logging();
    let Some(host) = host(SandboxPolicy::default()) else {
        return;
    };
    let source = "import sys\nprint('out')\nprint('careful', file=sys.stderr)";

    let result = host
        .run_source(Language::Python, source, &Default::default())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "out\n");
    let warnings: Vec<_> = result.logs_of(LogKind::Warn).map(|e| e.content.as_str()).collect();
    assert_eq!(warnings, vec!["careful"]);
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_runs_do_not_share_state() {
    setup_test_logging();
    let Some(host) = host(SandboxPolicy::default()) else {
        return;
    };

    let first = host
        .run_source(Language::Python, "counter = 1\nprint(counter)", &Default::default())
        .await
        .unwrap();
    assert!(first.success, "{:?}", first.error);

    let second = host
        .run_source(Language::Python, "print(counter)", &Default::default())
        .await
        .unwrap();
    assert_eq!(second.failure, Some(FailureKind::UserCode));
    assert!(second.error.unwrap().contains("NameError"));
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_log_entries_are_capped() {
    setup_test_logging();
    let Some(host) = host(SandboxPolicy::default().with_max_log_entries(5)) else {
        return;
    };

    let result = host
        .run_source(Language::Python, "for i in range(50):\n    print(i)", &Default::default())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    let expected: String = (0..50).map(|i| format!("{i}\n")).collect();
    assert_eq!(result.output, expected);
    assert_eq!(result.logs.len(), 6);
    assert_eq!(result.logs[5].kind, LogKind::Warn);
    assert_eq!(result.logs[5].content, "45 log entries truncated");
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_output_past_log_cap_is_truncated_with_marker() {
    setup_test_logging();
    let Some(host) = host(
        SandboxPolicy::default()
            .with_max_log_entries(5)
            .with_max_output_bytes(50),
    ) else {
        return;
    };

    let result = host
        .run_source(
            Language::Python,
            "for i in range(10, 40):\n    print(f'line-{i}')",
            &Default::default(),
        )
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    let kept = result.output.strip_suffix(OUTPUT_TRUNCATED_MARKER).unwrap();
    assert_eq!(kept.chars().count(), 50);
    assert!(kept.starts_with("line-10\nline-11\n"));
    assert_eq!(result.logs[5].content, "25 log entries truncated");
}

#[tokio::test]
#[ignore = "requires LABRUN_PYTHON_WASM pointing at a CPython WASI module"]
async fn test_traceback_names_entry_file() {
    setup_test_logging();
    let Some(host) = host(SandboxPolicy::default()) else {
        return;
    };
    let files = project(&[("app.py", "def broken():\n    raise ValueError('bad input')\n\nbroken()")]);

    let result = host.run_file("app.py", &files).await.unwrap();
    assert_eq!(result.failure, Some(FailureKind::UserCode));
    let error = result.error.unwrap();
    assert!(error.contains("app.py"), "{error}");
    assert!(error.contains("ValueError: bad input"), "{error}");
    assert_eq!(result.logs.last().map(|e| e.kind), Some(LogKind::Error));
}
