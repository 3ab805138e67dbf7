//! Shared fixtures: a scripted in-process build host and a client recorder.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use projsys_buildhost::{
    BuildHost, BuildHostError, BuildHostLauncher, BuildHostProcessManager, FallbackPolicy,
    LaunchedHost, RpcError,
};
use projsys_project::{
    ClientEvent, ClientNotifier, ProjectFileWatcher, ProjectLoadingConfig, ProjectSystem,
    WorkspaceModel,
};
use projsys_types::{
    BuildHostKind, DiagnosticLogItem, DiagnosticSeverity, DocumentFileInfo, ProjectFileHandle,
    ProjectFileInfo, SolutionProjectEntry,
};

/// What the fake build host answers, per project path.
#[derive(Default)]
pub struct HostScript {
    pub infos: HashMap<PathBuf, Vec<ProjectFileInfo>>,
    pub diagnostics: HashMap<PathBuf, Vec<DiagnosticLogItem>>,
    /// `load_project_file` fails for these.
    pub failing: HashSet<PathBuf>,
    /// `get_project_file_infos` panics for these.
    pub panicking: HashSet<PathBuf>,
    pub unsupported: HashSet<PathBuf>,
    pub unusable: HashSet<BuildHostKind>,
    pub solution: Vec<SolutionProjectEntry>,
}

pub type SharedScript = Arc<Mutex<HostScript>>;

pub struct ScriptedHost {
    kind: BuildHostKind,
    script: SharedScript,
    next_handle: AtomicU64,
    handles: Mutex<HashMap<ProjectFileHandle, PathBuf>>,
    pub loads: Mutex<Vec<PathBuf>>,
    pub unloads: AtomicUsize,
    exit_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScriptedHost {
    fn path_for(&self, handle: ProjectFileHandle) -> PathBuf {
        self.handles.lock().unwrap()[&handle].clone()
    }

    fn exit(&self) {
        if let Some(tx) = self.exit_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

impl BuildHost for ScriptedHost {
    fn kind(&self) -> BuildHostKind {
        self.kind
    }

    async fn has_usable_toolchain(&self, _project: &Path) -> Result<bool, BuildHostError> {
        Ok(!self.script.lock().unwrap().unusable.contains(&self.kind))
    }

    async fn is_project_file_supported(&self, project: &Path) -> Result<bool, BuildHostError> {
        Ok(!self.script.lock().unwrap().unsupported.contains(project))
    }

    async fn get_projects_in_solution(
        &self,
        _solution: &Path,
    ) -> Result<Vec<SolutionProjectEntry>, BuildHostError> {
        Ok(self.script.lock().unwrap().solution.clone())
    }

    async fn load_project_file(
        &self,
        project: &Path,
        _language: &str,
    ) -> Result<ProjectFileHandle, BuildHostError> {
        self.loads.lock().unwrap().push(project.to_path_buf());
        if self.script.lock().unwrap().failing.contains(project) {
            return Err(BuildHostError::Rpc {
                kind: self.kind,
                method: "buildHost/loadProjectFile",
                source: RpcError::ConnectionClosed,
            });
        }
        let handle = ProjectFileHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.handles
            .lock()
            .unwrap()
            .insert(handle, project.to_path_buf());
        Ok(handle)
    }

    async fn get_diagnostic_log_items(
        &self,
        handle: ProjectFileHandle,
    ) -> Result<Vec<DiagnosticLogItem>, BuildHostError> {
        let path = self.path_for(handle);
        Ok(self
            .script
            .lock()
            .unwrap()
            .diagnostics
            .get(&path)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_project_file_infos(
        &self,
        handle: ProjectFileHandle,
    ) -> Result<Vec<ProjectFileInfo>, BuildHostError> {
        let path = self.path_for(handle);
        let script = self.script.lock().unwrap();
        if script.panicking.contains(&path) {
            drop(script);
            panic!("evaluation blew up for {}", path.display());
        }
        Ok(script.infos.get(&path).cloned().unwrap_or_default())
    }

    async fn unload_project_file(&self, handle: ProjectFileHandle) -> Result<(), BuildHostError> {
        self.handles.lock().unwrap().remove(&handle);
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BuildHostError> {
        self.exit();
        Ok(())
    }

    fn terminate(&self) {
        self.exit();
    }
}

pub struct ScriptedLauncher {
    script: SharedScript,
    pub launched: Mutex<Vec<Arc<ScriptedHost>>>,
}

impl ScriptedLauncher {
    pub fn launched_kinds(&self) -> Vec<BuildHostKind> {
        self.launched.lock().unwrap().iter().map(|h| h.kind).collect()
    }

    pub fn total_loads(&self) -> usize {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.loads.lock().unwrap().len())
            .sum()
    }

    pub fn total_unloads(&self) -> usize {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.unloads.load(Ordering::SeqCst))
            .sum()
    }
}

impl BuildHostLauncher for ScriptedLauncher {
    type Host = ScriptedHost;

    fn launch(&self, kind: BuildHostKind) -> Result<LaunchedHost<ScriptedHost>, BuildHostError> {
        let (exit_tx, exited) = oneshot::channel();
        let host = Arc::new(ScriptedHost {
            kind,
            script: Arc::clone(&self.script),
            next_handle: AtomicU64::new(1),
            handles: Mutex::default(),
            loads: Mutex::default(),
            unloads: AtomicUsize::new(0),
            exit_tx: Mutex::new(Some(exit_tx)),
        });
        self.launched.lock().unwrap().push(Arc::clone(&host));
        Ok(LaunchedHost { host, exited })
    }
}

/// What the client saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    InitializationComplete,
    Restore(Vec<PathBuf>),
    Log(DiagnosticSeverity, String),
    Toast(String),
}

/// Records client events and acknowledges restore requests.
pub fn spawn_client(mut rx: mpsc::Receiver<ClientEvent>) -> Arc<Mutex<Vec<Seen>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let entry = match event {
                ClientEvent::ProjectInitializationComplete => Seen::InitializationComplete,
                ClientEvent::RestoreRequested { projects, ack } => {
                    let _ = ack.send(());
                    Seen::Restore(projects)
                }
                ClientEvent::Log { severity, message } => Seen::Log(severity, message),
                ClientEvent::ShowToast { message, .. } => Seen::Toast(message),
            };
            sink.lock().unwrap().push(entry);
        }
    });
    seen
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub script: SharedScript,
    pub system: ProjectSystem<ScriptedLauncher, WorkspaceModel>,
    pub client: Arc<Mutex<Vec<Seen>>>,
    pub watcher: ProjectFileWatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ProjectLoadingConfig) -> Self {
        Self::with_options(config, FallbackPolicy::none())
    }

    pub fn with_options(config: ProjectLoadingConfig, fallback: FallbackPolicy) -> Self {
        let script = SharedScript::default();
        let launcher = ScriptedLauncher {
            script: Arc::clone(&script),
            launched: Mutex::default(),
        };
        let manager = BuildHostProcessManager::new(launcher, fallback, Duration::from_secs(1));
        let (notifier, rx) = ClientNotifier::channel(64);
        let (watcher, requeue) = ProjectFileWatcher::detached();
        let system = ProjectSystem::with_file_watcher(
            manager,
            Arc::new(WorkspaceModel::new()),
            config,
            notifier,
            watcher.clone(),
            requeue,
        );
        Self {
            dir: tempfile::tempdir().unwrap(),
            script,
            system,
            client: spawn_client(rx),
            watcher,
        }
    }

    /// Write an SDK-style project file and script a single-target snapshot for it.
    pub fn sdk_project(&self, name: &str, sources: &[&str]) -> PathBuf {
        let path = self.write_project(name, r#"<Project Sdk="Microsoft.NET.Sdk" />"#);
        self.set_info(&path, vec![snapshot(&path, Some("net8.0"), sources)]);
        path
    }

    pub fn write_project(&self, name: &str, xml: &str) -> PathBuf {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}.csproj"));
        std::fs::write(&path, xml).unwrap();
        path
    }

    pub fn set_info(&self, project: &Path, infos: Vec<ProjectFileInfo>) {
        self.script
            .lock()
            .unwrap()
            .infos
            .insert(project.to_path_buf(), infos);
    }

    pub fn launcher(&self) -> &ScriptedLauncher {
        self.system.manager().launcher()
    }

    pub fn model(&self) -> &WorkspaceModel {
        self.system.model()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.client.lock().unwrap().clone()
    }

    /// Wait until the recorder has seen an event matching `pred`.
    pub async fn wait_for_client(&self, pred: impl Fn(&Seen) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.client.lock().unwrap().iter().any(&pred) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client event never arrived");
    }
}

pub fn test_config() -> ProjectLoadingConfig {
    ProjectLoadingConfig {
        debounce_ms: 10,
        max_concurrent_loads: Some(4),
        ..ProjectLoadingConfig::default()
    }
}

pub fn snapshot(project: &Path, tfm: Option<&str>, sources: &[&str]) -> ProjectFileInfo {
    let dir = project.parent().unwrap();
    ProjectFileInfo {
        documents: sources
            .iter()
            .map(|s| DocumentFileInfo::new(dir.join(s)))
            .collect(),
        ..ProjectFileInfo::new(project, "C#", tfm)
    }
}
