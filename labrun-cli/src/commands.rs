//! CLI command implementations

use crate::project::{load_project, resolve_entry};
use anyhow::{bail, Context, Result};
use labrun_sandbox::{
    detect_language, ExecutionResult, Language, LabrunConfig, LogKind, ProjectRunner, RunnerFactory,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub struct RunArgs {
    pub file: PathBuf,
    pub project: Option<PathBuf>,
    pub language: Option<String>,
    pub timeout: Option<Duration>,
    pub json: bool,
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(LabrunConfig::config_path()?),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<LabrunConfig> {
    let path = config_path(explicit)?;
    LabrunConfig::load_from(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Run a project file; returns whether the run succeeded
pub async fn execute_run(config: Option<&Path>, args: RunArgs) -> Result<bool> {
    let mut config = load_config(config)?;
    if let Some(timeout) = args.timeout {
        config.sandbox.timeout = timeout;
    }

    let (root, entry) = resolve_entry(&args.file, args.project.as_deref())?;
    let files = load_project(&root)?;
    info!(root = %root.display(), entry = %entry, files = files.len(), "Loaded project");

    let host = ProjectRunner::new(RunnerFactory::from_config(&config)?);
    let result = match &args.language {
        Some(tag) => {
            let language: Language = tag.parse()?;
            host.run_file_as(&entry, language, &files).await?
        }
        None => host.run_file(&entry, &files).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(result.success)
}

fn print_result(result: &ExecutionResult) {
    print!("{}", result.output);
    if !result.output.is_empty() && !result.output.ends_with('\n') {
        println!();
    }

    // log and info entries are already part of the output
    for entry in &result.logs {
        let label = match entry.kind {
            LogKind::Warn => "warn",
            LogKind::Error => "error",
            LogKind::Log | LogKind::Info => continue,
        };
        eprintln!("[{label}] {}", entry.content);
    }

    if let Some(error) = &result.error {
        eprintln!("\n✗ {}", error);
    }
    eprintln!(
        "\n{} in {}ms{}",
        if result.success { "✓ Finished" } else { "✗ Failed" },
        result.execution_time_ms,
        result
            .memory_usage_bytes
            .map(|bytes| format!(", {:.1} MiB", bytes as f64 / (1024.0 * 1024.0)))
            .unwrap_or_default()
    );
}

pub fn execute_languages(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let host = ProjectRunner::new(RunnerFactory::from_config(&config)?);

    for language in Language::ALL {
        if !host.is_language_supported(language) {
            println!("{:<12} not runnable", language.as_str());
            continue;
        }
        let runner = host.runner_for(language)?;
        let status = if runner.is_supported() {
            "ready"
        } else {
            "unavailable"
        };
        println!(
            "{:<12} {:<12} {} ({})",
            language.as_str(),
            runner.name(),
            status,
            language.extensions().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

pub fn execute_detect(file: &str) -> Result<()> {
    match detect_language(file) {
        Some(language) => {
            let runnable = if labrun_sandbox::is_language_supported(language) {
                "runnable"
            } else {
                "not runnable"
            };
            println!("{} ({})", language, runnable);
            Ok(())
        }
        None => bail!("Cannot determine the language of '{}'", file),
    }
}

pub fn execute_config_init(config: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(config)?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    LabrunConfig::default().save_to(&path)?;
    println!("✓ Wrote {}", path.display());
    Ok(())
}

pub fn execute_config_show(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn execute_config_path(config: Option<&Path>) -> Result<()> {
    println!("{}", config_path(config)?.display());
    Ok(())
}
