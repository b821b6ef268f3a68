mod commands;
mod project;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "labrun")]
#[command(about = "Run lab IDE projects in a local sandbox")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/labrun/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a file of a project
    Run {
        /// File to run
        file: PathBuf,

        /// Project directory (default: the file's directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Run as this language instead of the one implied by the extension
        #[arg(short, long)]
        language: Option<String>,

        /// Execution timeout, e.g. "5s" or "1500ms"
        #[arg(short, long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Print the execution result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List runnable languages
    Languages,
    /// Detect the language of a file name
    Detect {
        file: String,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn init_tracing(verbose: bool, log_file: Option<&PathBuf>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "labrun={},labrun_sandbox={}",
            log_level, log_level
        ))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let file_appender =
                tracing_appender::rolling::never(dir.unwrap_or_else(|| std::path::Path::new(".")), name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_file.as_ref())?;

    match cli.command {
        Commands::Run {
            file,
            project,
            language,
            timeout,
            json,
        } => {
            let args = commands::RunArgs {
                file,
                project,
                language,
                timeout,
                json,
            };
            let success = commands::execute_run(cli.config.as_deref(), args).await?;
            return Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Languages => commands::execute_languages(cli.config.as_deref())?,
        Commands::Detect { file } => commands::execute_detect(&file)?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::execute_config_init(cli.config.as_deref(), force)?,
            ConfigAction::Show => commands::execute_config_show(cli.config.as_deref())?,
            ConfigAction::Path => commands::execute_config_path(cli.config.as_deref())?,
        },
    }

    Ok(ExitCode::SUCCESS)
}
