//! Configuration management for labrun

use crate::error::ConfigError;
use crate::policy::SandboxPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming the CPython WASI module when the config has none
pub const PYTHON_WASM_ENV: &str = "LABRUN_PYTHON_WASM";

/// Packages imported by the interpreter health check at boot
pub const DEFAULT_PRELOAD_PACKAGES: &[&str] = &[
    "json",
    "math",
    "re",
    "collections",
    "itertools",
    "functools",
    "random",
    "datetime",
    "string",
    "textwrap",
    "statistics",
    "dataclasses",
    "typing",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabrunConfig {
    #[serde(default)]
    pub sandbox: SandboxPolicy,

    #[serde(default)]
    pub python: PythonConfig,
}

/// Python interpreter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PythonConfig {
    /// CPython WASI module: a local path or an http(s) URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Host directory holding the Python standard library, mounted at `/usr/local/lib`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdlib_dir: Option<PathBuf>,

    /// Guest linear-memory ceiling
    pub max_memory_bytes: usize,

    pub preload_packages: Vec<String>,

    /// Upper bound on fetching, compiling and probing the interpreter
    #[serde(with = "humantime_serde")]
    pub boot_timeout: Duration,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            stdlib_dir: None,
            max_memory_bytes: 256 * 1024 * 1024,
            preload_packages: DEFAULT_PRELOAD_PACKAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            boot_timeout: Duration::from_secs(60),
        }
    }
}

impl PythonConfig {
    /// Interpreter location from the config, falling back to [`PYTHON_WASM_ENV`]
    pub fn interpreter_source(&self) -> Option<InterpreterSource> {
        self.interpreter
            .clone()
            .or_else(|| std::env::var(PYTHON_WASM_ENV).ok())
            .filter(|s| !s.trim().is_empty())
            .map(|s| InterpreterSource::parse(&s))
    }
}

/// Where the CPython WASI module is loaded from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterpreterSource {
    Path(PathBuf),
    Url(Url),
}

impl InterpreterSource {
    /// `http://` and `https://` locations are URLs, everything else a path
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => InterpreterSource::Url(url),
            _ => InterpreterSource::Path(PathBuf::from(location)),
        }
    }
}

impl fmt::Display for InterpreterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpreterSource::Path(path) => write!(f, "{}", path.display()),
            InterpreterSource::Url(url) => write!(f, "{}", url),
        }
    }
}

impl LabrunConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: LabrunConfig = toml::from_str(&content)?;
        config.sandbox.validate()?;

        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".config").join("labrun").join("config.toml"))
    }
}
