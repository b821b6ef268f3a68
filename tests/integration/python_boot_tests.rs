//! Interpreter boot failures and retries, served by a mock CDN

use labrun_sandbox::{
    FailureKind, Language, LanguageRunner, ProjectRunner, PythonConfig, PythonRunner, RunnerFactory,
    SandboxPolicy,
};
use labrun_tests::{project, setup_test_logging};
use tracing_test::traced_test;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn python_config(server: &MockServer) -> PythonConfig {
    PythonConfig {
        interpreter: Some(format!("{}/python.wasm", server.uri())),
        ..Default::default()
    }
}

fn boot_error(result: &labrun_sandbox::ExecutionResult) -> &str {
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Sandbox));
    result.error.as_deref().unwrap_or_default()
}

#[tokio::test]
async fn test_missing_interpreter_is_reported() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let runner = PythonRunner::new(SandboxPolicy::default(), python_config(&server));
    let result = runner.execute("print('hi')", &Default::default()).await;

    let error = boot_error(&result);
    assert!(error.starts_with("Python interpreter failed to load: cannot fetch"), "{error}");
    assert!(result.output.is_empty());
}

#[tokio::test]
async fn test_invalid_module_is_reported() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a wasm module".to_vec()))
        .mount(&server)
        .await;

    let runner = PythonRunner::new(SandboxPolicy::default(), python_config(&server));
    let result = runner.execute("print('hi')", &Default::default()).await;

    let error = boot_error(&result);
    assert!(error.contains("invalid WebAssembly module"), "{error}");
}

#[tokio::test]
async fn test_failed_boot_is_retried() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .expect(1)
        .mount(&server)
        .await;

    let runner = PythonRunner::new(SandboxPolicy::default(), python_config(&server));

    let first = runner.execute("print(1)", &Default::default()).await;
    assert!(boot_error(&first).contains("cannot fetch"));

    let second = runner.execute("print(1)", &Default::default()).await;
    assert!(boot_error(&second).contains("invalid WebAssembly module"));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_boot() {
    setup_test_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(
            ResponseTemplate::new(404).set_delay(std::time::Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let runner = PythonRunner::new(SandboxPolicy::default(), python_config(&server));
    let files = Default::default();
    let (a, b, c) = tokio::join!(
        runner.execute("print('a')", &files),
        runner.execute("print('b')", &files),
        runner.execute("print('c')", &files),
    );

    assert_eq!(boot_error(&a), boot_error(&b));
    assert_eq!(boot_error(&b), boot_error(&c));
}

#[tokio::test]
#[traced_test]
async fn test_host_logs_boot_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/python.wasm"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let host = ProjectRunner::new(
        RunnerFactory::new(SandboxPolicy::default(), python_config(&server)).unwrap(),
    );
    let files = project(&[("main.py", "print('hi')")]);
    let result = host.run_file("main.py", &files).await.unwrap();

    assert_eq!(result.failure, Some(FailureKind::Sandbox));
    assert!(logs_contain("Python interpreter boot failed"));
    assert!(logs_contain("Run finished"));

    let runner = host.runner_for(Language::Python).unwrap();
    assert_eq!(runner.name(), "cpython-wasi");
}
