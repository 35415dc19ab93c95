mod codec;
mod config;
mod error;
mod forge;
mod orchestrator;
mod patch;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Credentials};
use crate::error::{FailureKind, PatchError};
use crate::forge::FileTarget;
use crate::orchestrator::{Mode, PatchOutcome};
use crate::patch::PatchRequest;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gitfile-patch",
    version,
    about = "Set one key of a JSON file in a CODING repository as a new commit"
)]
struct Cli {
    /// Repository, in the format of `team/project/repo`.
    #[arg(long)]
    repo: String,

    /// File to update, in the format of `path/to/file.json`.
    #[arg(long)]
    file: String,

    /// Branch the file is read from and committed to.
    #[arg(long, default_value = "master")]
    branch: String,

    /// Top-level key to set.
    #[arg(long, value_parser = parse_key)]
    key: String,

    /// String value to store under the key.
    #[arg(long, allow_hyphen_values = true)]
    value: String,

    /// Optional YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the API root from the configuration.
    #[arg(long, env = "CODING_API_URL")]
    api_url: Option<String>,

    /// Print the patched document instead of committing it.
    #[arg(long)]
    dry_run: bool,

    /// Overall deadline for the run, in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn parse_key(s: &str) -> Result<String, String> {
    if s.is_empty() {
        Err("key must not be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Run failures
// ---------------------------------------------------------------------------

/// Why a run ended unsuccessfully.
#[derive(Debug)]
enum RunFailure {
    /// Configuration or client construction failed before any remote call.
    Setup(anyhow::Error),
    Patch(PatchError),
    Cancelled(&'static str),
    DeadlineExceeded(u64),
}

impl RunFailure {
    fn exit_status(&self) -> u8 {
        match self {
            Self::Patch(e) if e.kind() == FailureKind::Conflict => 3,
            Self::Cancelled(_) | Self::DeadlineExceeded(_) => 4,
            _ => 1,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "setup failure: {e:#}"),
            Self::Patch(e) => write!(f, "{} failure: {e}", e.kind()),
            Self::Cancelled(signal) => write!(f, "cancelled by {signal} before completion"),
            Self::DeadlineExceeded(secs) => write!(f, "deadline of {secs}s exceeded"),
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    // stdout is reserved for dry-run output.
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(api_url) = &cli.api_url {
        config.api.api_url = api_url.clone();
    }
    config::validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Resolve with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn run(cli: &Cli) -> Result<PatchOutcome, RunFailure> {
    let config = build_config(cli).map_err(RunFailure::Setup)?;

    let credentials = Credentials::from_env(&config.credentials);
    let store = forge::build_store(&config, credentials).map_err(RunFailure::Setup)?;
    tracing::debug!(api_url = %config.api.api_url, "file store initialised");

    let target = FileTarget::new(&cli.repo, &cli.file, &cli.branch);
    let request = PatchRequest::new(&cli.key, &cli.value);
    let mode = if cli.dry_run { Mode::DryRun } else { Mode::Commit };

    let patch = orchestrator::run_patch(store.as_ref(), &target, &request, mode);
    let bounded = async {
        match cli.timeout {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), patch).await {
                Ok(result) => result.map_err(RunFailure::Patch),
                Err(_) => Err(RunFailure::DeadlineExceeded(secs)),
            },
            None => patch.await.map_err(RunFailure::Patch),
        }
    };

    // Dropping the in-flight future abandons the run; a commit only exists if
    // its request already completed.
    tokio::select! {
        result = bounded => result,
        name = shutdown_signal() => Err(RunFailure::Cancelled(name)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    tracing::info!(
        repo = %cli.repo,
        file = %cli.file,
        branch = %cli.branch,
        key = %cli.key,
        dry_run = cli.dry_run,
        "starting gitfile-patch"
    );

    match run(&cli).await {
        Ok(PatchOutcome::Unchanged { path }) => {
            tracing::info!(%path, "nothing to commit");
            ExitCode::SUCCESS
        }
        Ok(PatchOutcome::Committed { path, revision }) => {
            tracing::info!(%path, %revision, "patch committed");
            ExitCode::SUCCESS
        }
        Ok(PatchOutcome::WouldCommit { content, .. }) => {
            print!("{content}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("gitfile-patch: {failure}");
            ExitCode::from(failure.exit_status())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, Stage, StoreError};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("gitfile-patch").chain(args.iter().copied()))
    }

    #[test]
    fn branch_defaults_to_master() {
        let cli = parse(&[
            "--repo", "team/proj/repo", "--file", "app.json", "--key", "a", "--value", "1",
        ])
        .unwrap();
        assert_eq!(cli.branch, "master");
        assert!(!cli.dry_run);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn value_may_start_with_a_hyphen() {
        let cli = parse(&[
            "--repo", "r", "--file", "f", "--key", "offset", "--value", "-5",
        ])
        .unwrap();
        assert_eq!(cli.value, "-5");
    }

    #[test]
    fn empty_key_is_a_usage_error() {
        let err = parse(&["--repo", "r", "--file", "f", "--key", "", "--value", "1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn missing_required_flags_is_a_usage_error() {
        assert!(parse(&["--repo", "r"]).is_err());
    }

    #[test]
    fn api_url_flag_overrides_config() {
        let cli = parse(&[
            "--repo", "r", "--file", "f", "--key", "k", "--value", "v",
            "--api-url", "http://127.0.0.1:8080/open-api",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.api.api_url, "http://127.0.0.1:8080/open-api");
    }

    #[test]
    fn invalid_api_url_fails_setup() {
        let cli = parse(&[
            "--repo", "r", "--file", "f", "--key", "k", "--value", "v",
            "--api-url", "e.coding.net",
        ])
        .unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn failure_message_names_kind_and_stage() {
        let failure = RunFailure::Patch(PatchError::new(
            Stage::Decoding,
            CodecError::UnsupportedEncoding("gzip+base64".to_string()),
        ));
        assert_eq!(
            failure.to_string(),
            "format failure: decoding: unsupported content encoding \"gzip+base64\""
        );
    }

    #[test]
    fn conflicts_exit_with_a_distinct_code() {
        let conflict = RunFailure::Patch(PatchError::new(
            Stage::Committing,
            StoreError::Conflict {
                action: "ModifyGitFiles",
                code: "FailedOperation".to_string(),
                message: "stale".to_string(),
            },
        ));
        assert_eq!(conflict.exit_status(), 3);
        assert_eq!(RunFailure::DeadlineExceeded(5).exit_status(), 4);
        assert_eq!(RunFailure::Cancelled("SIGINT").exit_status(), 4);
        assert_eq!(RunFailure::Setup(anyhow::anyhow!("bad")).exit_status(), 1);
    }
}
