//! JavaScript and TypeScript projects run through the host surface

use labrun_common::OUTPUT_TRUNCATED_MARKER;
use labrun_sandbox::{
    FailureKind, Language, LogKind, ProjectRunner, PythonConfig, RunnerFactory, SandboxPolicy,
};
use labrun_tests::{project, setup_test_logging};
use std::sync::Arc;
use std::time::Duration;

fn host(policy: SandboxPolicy) -> ProjectRunner {
    ProjectRunner::new(RunnerFactory::new(policy, PythonConfig::default()).unwrap())
}

#[tokio::test]
async fn test_run_file_loads_siblings() {
    setup_test_logging();
    let files = project(&[
        ("main.js", "import { total } from './cart.js';\nconsole.log('total', total([2, 3]));"),
        ("cart.js", "export function total(items) { return items.reduce((a, b) => a + b, 0); }"),
    ]);

    let result = ProjectRunner::default().run_file("main.js", &files).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "total 5\n");
}

#[tokio::test]
async fn test_typescript_project_with_types() {
    setup_test_logging();
    let files = project(&[(
        "src/index.ts",
        "interface Point { x: number; y: number }\n\
         const p: Point = { x: 1, y: 2 };\n\
         function len(p: Point): number { return Math.abs(p.x) + Math.abs(p.y); }\n\
         console.log(len(p));",
    )]);

    let result = ProjectRunner::default().run_file("src/index.ts", &files).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "3\n");
    assert_eq!(result.failure, None);
}

#[tokio::test]
async fn test_runtime_error_reports_user_failure() {
    setup_test_logging();
    let files = project(&[("main.js", "console.log('start');\nnull.x;")]);

    let result = ProjectRunner::default().run_file("main.js", &files).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::UserCode));
    assert!(result.error.as_deref().unwrap_or_default().contains("TypeError"));
    assert_eq!(result.output, "start\n");
    assert_eq!(result.logs.last().map(|e| e.kind), Some(LogKind::Error));
}

#[tokio::test]
async fn test_network_globals_are_unavailable() {
    setup_test_logging();
    let source = "console.log(typeof fetch, typeof XMLHttpRequest, typeof WebSocket);";

    let result = ProjectRunner::default()
        .run_source(Language::JavaScript, source, &Default::default())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "undefined undefined undefined\n");
}

#[tokio::test]
async fn test_timeout_and_recovery() {
    setup_test_logging();
    let host = host(SandboxPolicy::default().with_timeout(Duration::from_millis(300)));

    let result = host
        .run_source(Language::JavaScript, "for (;;) {}", &Default::default())
        .await
        .unwrap();
    assert!(result.is_timeout());
    assert_eq!(
        result.error.as_deref(),
        Some("Execution timed out: execution took longer than 300ms")
    );

    let result = host
        .run_source(Language::JavaScript, "console.log('again')", &Default::default())
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output, "again\n");
}

#[tokio::test]
async fn test_host_stop_terminates_run() {
    setup_test_logging();
    let host = Arc::new(host(SandboxPolicy::default().with_timeout(Duration::from_secs(30))));

    let running = {
        let host = host.clone();
        tokio::spawn(async move {
            host.run_source(Language::JavaScript, "while (true) {}", &Default::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    host.stop();

    let result = running.await.unwrap().unwrap();
    assert_eq!(result.failure, Some(FailureKind::Stopped));
    assert!(result.execution_time_ms < 30_000);
}

#[tokio::test]
async fn test_output_is_truncated() {
    setup_test_logging();
    let host = host(SandboxPolicy::default().with_max_output_bytes(20));

    let result = host
        .run_source(
            Language::JavaScript,
            "console.log('x'.repeat(100));",
            &Default::default(),
        )
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.output.ends_with(OUTPUT_TRUNCATED_MARKER));
    assert_eq!(
        result.output.chars().count(),
        20 + OUTPUT_TRUNCATED_MARKER.chars().count()
    );
}

#[tokio::test]
async fn test_output_past_log_cap_keeps_filling_to_limit() {
    setup_test_logging();
    let host = host(
        SandboxPolicy::default()
            .with_max_log_entries(10)
            .with_max_output_bytes(1000),
    );

    let result = host
        .run_source(
            Language::JavaScript,
            "for (let i = 0; i < 300; i++) console.log('y'.repeat(19));",
            &Default::default(),
        )
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    let kept = result.output.strip_suffix(OUTPUT_TRUNCATED_MARKER).unwrap();
    assert_eq!(kept.chars().count(), 1000);
    assert_eq!(kept.lines().count(), 50);
    assert_eq!(result.logs.len(), 11);
    assert_eq!(result.logs[10].content, "290 log entries truncated");
}

#[tokio::test]
async fn test_runs_do_not_share_globals() {
    setup_test_logging();
    let host = ProjectRunner::default();

    let first = host
        .run_source(Language::JavaScript, "globalThis.leak = 42;", &Default::default())
        .await
        .unwrap();
    assert!(first.success);

    let second = host
        .run_source(Language::JavaScript, "console.log(typeof leak);", &Default::default())
        .await
        .unwrap();
    assert_eq!(second.output, "undefined\n");
}

#[tokio::test]
async fn test_result_serializes_camel_case() {
    let result = ProjectRunner::default()
        .run_source(Language::JavaScript, "console.warn('careful')", &Default::default())
        .await
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert!(json["executionTimeMs"].is_u64());
    assert_eq!(json["logs"][0]["kind"], "warn");
    assert_eq!(json["logs"][0]["content"], "careful");
}
