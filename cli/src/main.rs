//! projsys CLI - open solutions and projects, print what loaded.
//!
//! ```text
//! projsys [--watch] <solution|project|file-uri>...
//! ```
//!
//! Projects are evaluated by out-of-process build hosts and applied to an
//! in-memory workspace. With `--watch`, edits to project files, restore lock
//! files and matching source globs trigger reloads until Ctrl-C.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

use projsys_buildhost::{BuildHostProcessManager, ProcessLauncher};
use projsys_config::ProjsysConfig;
use projsys_project::client::CLIENT_CHANNEL_CAPACITY;
use projsys_project::{
    ClientEvent, ClientNotifier, ProjectFileWatcher, ProjectSystem, WorkspaceModel,
};
use projsys_types::DiagnosticSeverity;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stderr keeps stdout clean for the summary.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.projsys/logs/projsys.log
    if let Some(config_path) = ProjsysConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("projsys.log"));
    }

    // Fallback: ./.projsys/logs/projsys.log
    candidates.push(PathBuf::from(".projsys").join("logs").join("projsys.log"));

    candidates
}

#[derive(Parser, Debug)]
#[command(name = "projsys")]
#[command(about = "Load .NET solutions and projects through out-of-process build hosts")]
struct Cli {
    /// Keep running and reload projects when their files change
    #[arg(short, long)]
    watch: bool,

    /// Solution or project files, or `file://` URIs
    #[arg(required = true, value_name = "TARGET")]
    targets: Vec<String>,
}

/// Targets split into plain paths and `file:` URIs.
#[derive(Debug, Default)]
struct Targets {
    paths: Vec<PathBuf>,
    uris: Vec<Url>,
}

impl Targets {
    fn from_args(targets: &[String]) -> Result<Self> {
        let mut split = Self::default();
        for target in targets {
            if target.starts_with("file:") {
                let uri =
                    Url::parse(target).with_context(|| format!("invalid URI '{target}'"))?;
                split.uris.push(uri);
            } else {
                split.paths.push(PathBuf::from(target));
            }
        }
        Ok(split)
    }
}

/// Print client events and acknowledge restore requests.
fn spawn_client_printer(mut rx: mpsc::Receiver<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ClientEvent::ProjectInitializationComplete => {
                    eprintln!("initialization complete");
                }
                ClientEvent::RestoreRequested { projects, ack } => {
                    eprintln!("restore needed for {} project(s):", projects.len());
                    for project in &projects {
                        eprintln!("  {}", project.display());
                    }
                    let _ = ack.send(());
                }
                ClientEvent::Log { severity, message } => {
                    if severity != DiagnosticSeverity::Information {
                        eprintln!("{severity}: {message}");
                    }
                }
                ClientEvent::ShowToast { severity, message } => {
                    eprintln!("[{severity}] {message}");
                }
            }
        }
    })
}

fn print_summary(model: &WorkspaceModel) {
    for (id, project) in model.projects() {
        println!(
            "{id}  {}  {} documents, {} metadata references, {} project references",
            project.name,
            project.documents.len(),
            project.metadata_references.len(),
            project.project_references.len(),
        );
    }
}

async fn run(watch: bool, targets: Targets) -> Result<()> {
    let config = match ProjsysConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(path = %e.path().display(), "using default config: {e}");
            ProjsysConfig::default()
        }
    };

    let fallback = config.build_host.fallback.clone();
    let shutdown_timeout = config.build_host.shutdown_timeout();
    let manager = BuildHostProcessManager::new(
        ProcessLauncher::new(config.build_host),
        fallback,
        shutdown_timeout,
    );
    let model = Arc::new(WorkspaceModel::new());
    let (client, events) = ClientNotifier::channel(CLIENT_CHANNEL_CAPACITY);
    let printer = spawn_client_printer(events);

    let system = if watch {
        match ProjectFileWatcher::new() {
            Ok((watcher, requeue)) => ProjectSystem::with_file_watcher(
                manager,
                Arc::clone(&model),
                config.project_loading,
                client,
                watcher,
                requeue,
            ),
            Err(e) => {
                tracing::warn!("file watching unavailable: {e}");
                ProjectSystem::new(manager, Arc::clone(&model), config.project_loading, client)
            }
        }
    } else {
        ProjectSystem::new(manager, Arc::clone(&model), config.project_loading, client)
    };

    if !targets.paths.is_empty() {
        system.open(&targets.paths).await;
    }
    if !targets.uris.is_empty() {
        system.open_uris(&targets.uris).await;
    }
    print_summary(&model);

    let diagnostics = system.diagnostics();
    if !diagnostics.is_empty() {
        eprintln!("diagnostics: {}", diagnostics.status_string());
    }

    if watch {
        eprintln!("watching for changes; Ctrl-C to exit");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl-C: {e}");
        }
        system.wait_for_pending_loads().await;
        print_summary(&model);
    }

    system.shutdown().await;
    drop(system);
    printer.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let targets = match Targets::from_args(&cli.targets) {
        Ok(targets) => targets,
        Err(e) => Cli::command().error(ErrorKind::ValueValidation, format!("{e:#}")).exit(),
    };

    init_tracing();
    run(cli.watch, targets).await
}
