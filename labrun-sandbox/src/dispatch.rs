//! Runner selection by language

use crate::config::{LabrunConfig, PythonConfig};
use crate::error::DispatchError;
use crate::policy::SandboxPolicy;
use crate::runtime::{JavaScriptRunner, LanguageRunner, PythonRunner};
use labrun_common::Language;

/// Languages this build can run, in display order
pub fn supported_languages() -> Vec<Language> {
    let mut languages = Vec::new();

    #[cfg(feature = "javascript")]
    languages.extend([Language::JavaScript, Language::TypeScript]);

    #[cfg(feature = "python")]
    languages.push(Language::Python);

    languages
}

pub fn is_language_supported(language: Language) -> bool {
    supported_languages().contains(&language)
}

/// Runner for `language` with the default policy and configuration
pub fn create_runner(language: Language) -> Result<Box<dyn LanguageRunner>, DispatchError> {
    RunnerFactory::default().create_runner(language)
}

/// Creates runners sharing one policy and interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerFactory {
    policy: SandboxPolicy,
    python: PythonConfig,
}

impl RunnerFactory {
    /// Fails when the policy's capability lists conflict or a limit is unusable
    pub fn new(policy: SandboxPolicy, python: PythonConfig) -> Result<Self, DispatchError> {
        policy.validate()?;
        Ok(Self { policy, python })
    }

    pub fn from_config(config: &LabrunConfig) -> Result<Self, DispatchError> {
        Self::new(config.sandbox.clone(), config.python.clone())
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn python(&self) -> &PythonConfig {
        &self.python
    }

    pub fn create_runner(&self, language: Language) -> Result<Box<dyn LanguageRunner>, DispatchError> {
        if !is_language_supported(language) {
            return Err(DispatchError::UnsupportedLanguage(language));
        }

        let runner: Box<dyn LanguageRunner> = match language {
            Language::JavaScript => Box::new(JavaScriptRunner::new(self.policy.clone())),
            Language::TypeScript => Box::new(JavaScriptRunner::typescript(self.policy.clone())),
            Language::Python => Box::new(PythonRunner::new(self.policy.clone(), self.python.clone())),
            other => return Err(DispatchError::UnsupportedLanguage(other)),
        };

        tracing::debug!(language = %language, runner = runner.name(), "Created runner");
        Ok(runner)
    }
}
