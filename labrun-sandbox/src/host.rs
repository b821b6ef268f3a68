//! Host integration surface: run project files by name

use crate::config::LabrunConfig;
use crate::dispatch::{self, RunnerFactory};
use crate::error::DispatchError;
use crate::execution::ExecutionId;
use crate::runtime::LanguageRunner;
use labrun_common::{detect_language, ExecutionResult, FileMap, Language};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::Instrument;

/// Runs files of a learner's project, creating one runner per language on
/// first use and reusing it afterwards
pub struct ProjectRunner {
    factory: RunnerFactory,
    runners: RwLock<HashMap<Language, Arc<dyn LanguageRunner>>>,
}

impl ProjectRunner {
    pub fn new(factory: RunnerFactory) -> Self {
        Self {
            factory,
            runners: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &LabrunConfig) -> Result<Self, DispatchError> {
        Ok(Self::new(RunnerFactory::from_config(config)?))
    }

    pub fn factory(&self) -> &RunnerFactory {
        &self.factory
    }

    /// Run the project file at `path`, with its language taken from the extension
    pub async fn run_file(&self, path: &str, files: &FileMap) -> Result<ExecutionResult, DispatchError> {
        let language =
            detect_language(path).ok_or_else(|| DispatchError::UnknownFileType(path.to_string()))?;
        self.run_file_as(path, language, files).await
    }

    /// Run the project file at `path` as `language`, ignoring its extension
    pub async fn run_file_as(
        &self,
        path: &str,
        language: Language,
        files: &FileMap,
    ) -> Result<ExecutionResult, DispatchError> {
        let runner = self.runner_for(language)?;
        let source = files
            .get(path)
            .ok_or_else(|| DispatchError::FileNotFound(path.to_string()))?;

        let id = ExecutionId::new();
        let span = tracing::info_span!(
            "run",
            execution_id = %id,
            language = %language,
            runner = runner.name(),
        );
        async {
            tracing::info!(path = %path, files = files.len(), "Running project file");
            let result = runner.execute_file(path, source, files).await;
            log_finished(&result);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Run unsaved `source` as `language` alongside the project's files
    pub async fn run_source(
        &self,
        language: Language,
        source: &str,
        files: &FileMap,
    ) -> Result<ExecutionResult, DispatchError> {
        let runner = self.runner_for(language)?;

        let id = ExecutionId::new();
        let span = tracing::info_span!(
            "run",
            execution_id = %id,
            language = %language,
            runner = runner.name(),
        );
        async {
            tracing::info!(code_len = source.len(), "Running source");
            let result = runner.execute(source, files).await;
            log_finished(&result);
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Stop every in-flight run; a no-op when nothing is running
    pub fn stop(&self) {
        let runners = self.runners.read().unwrap_or_else(|e| e.into_inner());
        for runner in runners.values() {
            runner.stop();
        }
    }

    /// Whether `file_name` has an extension this host can run
    pub fn can_run(&self, file_name: &str) -> bool {
        detect_language(file_name).is_some_and(dispatch::is_language_supported)
    }

    pub fn is_language_supported(&self, language: Language) -> bool {
        dispatch::is_language_supported(language)
    }

    pub fn supported_languages(&self) -> Vec<Language> {
        dispatch::supported_languages()
    }

    /// Cached runner for `language`, created on first use
    pub fn runner_for(&self, language: Language) -> Result<Arc<dyn LanguageRunner>, DispatchError> {
        if let Some(runner) = self
            .runners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&language)
        {
            return Ok(runner.clone());
        }

        let mut runners = self.runners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(runner) = runners.get(&language) {
            return Ok(runner.clone());
        }
        let runner: Arc<dyn LanguageRunner> = Arc::from(self.factory.create_runner(language)?);
        runners.insert(language, runner.clone());
        Ok(runner)
    }
}

impl Default for ProjectRunner {
    fn default() -> Self {
        Self::new(RunnerFactory::default())
    }
}

fn log_finished(result: &ExecutionResult) {
    tracing::info!(
        success = result.success,
        duration_ms = result.execution_time_ms,
        logs = result.logs.len(),
        failure = ?result.failure,
        "Run finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn project(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(path, source)| (path.to_string(), source.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let host = ProjectRunner::default();
        let files = project(&[("notes.txt", "hello"), ("Main.java", "class Main {}")]);

        assert_matches!(
            host.run_file("notes.txt", &files).await,
            Err(DispatchError::UnknownFileType(path)) if path == "notes.txt"
        );
        assert_matches!(
            host.run_file("Main.java", &files).await,
            Err(DispatchError::UnsupportedLanguage(Language::Java))
        );
        assert!(!host.can_run("notes.txt"));
        assert!(!host.can_run("Main.java"));
    }

    #[cfg(feature = "javascript")]
    #[tokio::test]
    async fn test_run_file_uses_cached_runner() {
        let host = ProjectRunner::default();
        let files = project(&[("main.js", "console.log('hi')")]);

        let result = host.run_file("main.js", &files).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output, "hi\n");

        let first = host.runner_for(Language::JavaScript).unwrap();
        let second = host.runner_for(Language::JavaScript).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_matches!(
            host.run_file("missing.js", &files).await,
            Err(DispatchError::FileNotFound(_))
        );
    }

    #[test]
    fn test_stop_when_idle() {
        let host = ProjectRunner::default();
        host.stop();
        host.stop();
    }
}
