mod display;
mod progress;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trustsign_core::{
    Artifact, ArtifactStatus, Clock, Settings, SettingsOverrides, SettingsStore, SystemClock,
};
use trustsign_engine::{Orchestrator, SignError};
use trustsign_store::{JsonSettingsFile, ScanOptions};
use trustsign_sync::{HttpTransport, SigningGateway};

use crate::progress::StderrReporter;

/// Batch code signing through a remote signing authority.
#[derive(Parser)]
#[command(name = "trustsign")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config location)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log at debug level (otherwise RUST_LOG, then warn)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List signable files under a directory
    Scan {
        path: PathBuf,

        #[command(flatten)]
        scan: ScanArgs,

        /// Print artifacts as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign every signable file under a directory, replacing each in place
    Sign {
        path: PathBuf,

        #[command(flatten)]
        scan: ScanArgs,

        #[command(flatten)]
        identity: IdentityArgs,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Include hidden files and directories
    #[arg(long)]
    hidden: bool,
}

impl ScanArgs {
    /// Command-line flags can enable what settings leave off, never the reverse.
    fn options(&self, settings: &Settings) -> ScanOptions {
        ScanOptions {
            recursive: self.recursive || settings.recursive_scan,
            show_hidden: self.hidden || settings.show_hidden_files,
        }
    }
}

/// Identity overrides; never written back to the settings file.
#[derive(Args)]
struct IdentityArgs {
    #[arg(long, env = "TRUSTSIGN_TENANT_ID")]
    tenant_id: Option<String>,

    #[arg(long, env = "TRUSTSIGN_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "TRUSTSIGN_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    #[arg(long, env = "TRUSTSIGN_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long = "profile", env = "TRUSTSIGN_PROFILE")]
    certificate_profile: Option<String>,
}

impl From<IdentityArgs> for SettingsOverrides {
    fn from(args: IdentityArgs) -> Self {
        Self {
            tenant_id: args.tenant_id,
            client_id: args.client_id,
            client_secret: args.client_secret,
            endpoint: args.endpoint,
            certificate_profile: args.certificate_profile,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let store = match cli.settings {
        Some(path) => JsonSettingsFile::new(path),
        None => JsonSettingsFile::default_location()
            .context("no per-user config directory; pass --settings")?,
    };
    let settings = store
        .load()
        .await
        .with_context(|| format!("loading settings from {}", store.path().display()))?;

    match cli.command {
        Commands::Scan { path, scan, json } => {
            cmd_scan(path, scan.options(&settings), json).await
        }
        Commands::Sign {
            path,
            scan,
            identity,
        } => {
            let options = scan.options(&settings);
            let settings = settings.with_overrides(identity.into());
            cmd_sign(&store, settings, &path, options).await
        }
    }
}

async fn cmd_scan(root: PathBuf, options: ScanOptions, json: bool) -> anyhow::Result<ExitCode> {
    let walk_root = root.clone();
    let artifacts =
        tokio::task::spawn_blocking(move || trustsign_store::scan(&walk_root, &options))
            .await
            .context("scan task failed")?
            .with_context(|| format!("scanning {}", root.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
    } else {
        display::print_artifacts(&root, &artifacts);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_sign(
    store: &JsonSettingsFile,
    settings: Settings,
    root: &Path,
    options: ScanOptions,
) -> anyhow::Result<ExitCode> {
    let transport = HttpTransport::new(&settings).context("preparing signing client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = Arc::new(SigningGateway::new(
        Arc::new(transport),
        settings.clone(),
        clock.clone(),
    ));
    let orchestrator = Orchestrator::new(settings, gateway, Arc::new(StderrReporter::new()), clock);

    let artifacts = orchestrator.scan_with(root, options).await?;
    if artifacts.is_empty() {
        println!("No signable files found in {}", root.display());
        return Ok(exit_code(&[]));
    }
    eprintln!("Signing {} file(s) from {}", artifacts.len(), root.display());

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                cancel.cancel();
            }
        }
    });

    let outcome = orchestrator.sign(&artifacts, cancel).await;
    remember_path(store, root).await;

    let mut finished: Vec<Artifact> = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        finished.push(artifact.snapshot().await);
    }

    match outcome {
        Ok(request) => display::print_request_summary(&request, root, &finished),
        Err(e) => {
            print_failure(&e);
            display::print_artifacts(root, &finished);
        }
    }

    Ok(exit_code(&finished))
}

/// True iff at least one file was selected and every selected file ended Completed.
fn all_signed(artifacts: &[Artifact]) -> bool {
    let mut selected = artifacts.iter().filter(|a| a.selected).peekable();
    selected.peek().is_some() && selected.all(|a| a.status() == ArtifactStatus::Completed)
}

fn exit_code(artifacts: &[Artifact]) -> ExitCode {
    if all_signed(artifacts) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_failure(e: &SignError) {
    eprintln!("Error [{}]: {e}", e.kind());
}

/// Record the signed directory in the settings file, leaving every other field as stored.
async fn remember_path(store: &JsonSettingsFile, root: &Path) {
    let path = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut stored = match store.load().await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(error = %e, "settings not reloaded; last path not saved");
            return;
        }
    };
    stored.last_selected_path = Some(path);
    match store.save(&stored).await {
        Ok(()) => info!(path = %store.path().display(), "settings saved"),
        Err(e) => warn!(error = %e, "could not save settings"),
    }
}
