//! Runner selection, configuration and host-level dispatch errors

use assert_matches::assert_matches;
use labrun_sandbox::{
    create_runner, detect_language, is_language_supported, supported_languages, DispatchError, Language,
    LabrunConfig, PolicyError, ProjectRunner, RunnerFactory, SandboxPolicy,
};
use labrun_tests::{project, setup_test_logging};
use std::time::Duration;

#[test]
fn test_supported_languages_are_runnable() {
    setup_test_logging();

    let languages = supported_languages();
    assert_eq!(
        languages,
        vec![Language::JavaScript, Language::TypeScript, Language::Python]
    );
    for language in Language::ALL {
        assert_eq!(is_language_supported(language), languages.contains(&language));
    }
}

#[test]
fn test_create_runner_matches_language() {
    for language in supported_languages() {
        let runner = create_runner(language).unwrap();
        assert_eq!(runner.language(), language);
    }

    let runner = create_runner(Language::TypeScript).unwrap();
    assert!(runner.is_supported());
}

#[test]
fn test_unsupported_languages_are_rejected() {
    for language in [Language::Java, Language::C, Language::Cpp, Language::Go, Language::Rust] {
        assert_matches!(
            create_runner(language).err(),
            Some(DispatchError::UnsupportedLanguage(l)) if l == language
        );
    }
}

#[test]
fn test_detect_language_by_extension() {
    assert_eq!(detect_language("src/app.tsx"), Some(Language::TypeScript));
    assert_eq!(detect_language("Main.JAVA"), Some(Language::Java));
    assert_eq!(detect_language("scripts/run.py"), Some(Language::Python));
    assert_eq!(detect_language("README"), None);
}

#[test]
fn test_conflicting_policy_is_rejected() {
    let mut policy = SandboxPolicy::default();
    policy.allowed_capabilities.insert("fetch".into());
    policy.blocked_capabilities.insert("fetch".into());

    let err = RunnerFactory::new(policy, Default::default()).unwrap_err();
    assert_matches!(err, DispatchError::Policy(PolicyError::CapabilityConflict(names)) if names == vec!["fetch".to_string()]);
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labrun").join("config.toml");

    let mut config = LabrunConfig::default();
    config.sandbox.timeout = Duration::from_millis(1500);
    config.python.interpreter = Some("https://cdn.example.com/python.wasm".into());
    config.save_to(&path).unwrap();

    let loaded = LabrunConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let factory = RunnerFactory::from_config(&loaded).unwrap();
    assert_eq!(factory.policy().timeout, Duration::from_millis(1500));
}

#[test]
fn test_partial_config_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[sandbox]\ntimeout = \"2s\"\n").unwrap();

    let config = LabrunConfig::load_from(&path).unwrap();
    assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
    assert_eq!(config.sandbox.max_log_entries, SandboxPolicy::default().max_log_entries);
    assert_eq!(config.python.max_memory_bytes, 256 * 1024 * 1024);
}

#[tokio::test]
async fn test_host_rejects_unknown_and_missing_files() {
    setup_test_logging();
    let host = ProjectRunner::default();
    let files = project(&[("main.js", "console.log(1)"), ("notes.txt", "hi")]);

    assert_matches!(
        host.run_file("notes.txt", &files).await,
        Err(DispatchError::UnknownFileType(path)) if path == "notes.txt"
    );
    assert_matches!(
        host.run_file("other.js", &files).await,
        Err(DispatchError::FileNotFound(path)) if path == "other.js"
    );
    assert_matches!(
        host.run_file_as("main.js", Language::Java, &files).await,
        Err(DispatchError::UnsupportedLanguage(Language::Java))
    );
}

#[test]
fn test_host_can_run() {
    let host = ProjectRunner::default();
    assert!(host.can_run("index.ts"));
    assert!(host.can_run("main.py"));
    assert!(!host.can_run("Main.java"));
    assert!(!host.can_run("Makefile"));
}

#[test]
fn test_host_reuses_runners() {
    let host = ProjectRunner::default();
    let first = host.runner_for(Language::JavaScript).unwrap();
    let second = host.runner_for(Language::JavaScript).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
