//! ProjectSystem: turns "open/reload this project" requests into model updates.
//!
//! Requests go through the batching work queue. Each batch fans out over the
//! projects with bounded parallelism; every project runs the load pipeline in
//! isolation, so one failure (or panic) never takes its siblings down. After
//! the batch, a single aggregated restore request goes to the client.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;
use std::panic::AssertUnwindSafe;
use std::path::{self, Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use futures_util::{FutureExt, StreamExt, stream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use url::Url;

use projsys_buildhost::{BuildHost, BuildHostLauncher, BuildHostProcessManager};
use projsys_types::{
    BuildHostKind, DiagnosticLogItem, DiagnosticSeverity, ProjectFileHandle, ProjectFileInfo,
    ProjectToLoad,
};

use crate::client::ClientNotifier;
use crate::diagnostics::{DiagnosticsStore, LoadDiagnostics};
use crate::error::LoadError;
use crate::loaded_project::LoadedProject;
use crate::model::ProjectModel;
use crate::queue::BatchingWorkQueue;
use crate::types::ProjectLoadingConfig;
use crate::watcher::{FileChangeKind, ProjectFileWatcher, WatchSubscription, WatchTarget};

const LOAD_FAILED_TOAST: &str = "Errors occurred while loading projects. See the log for details.";

/// Every LoadedProject of one project file, one per target framework.
#[derive(Default)]
struct ProjectSlot {
    projects: Vec<LoadedProject>,
    /// Set by unload; a load still holding the slot must not repopulate it.
    removed: bool,
}

/// Projects of one batch whose packages need a restore. Filled as each target
/// finishes, so a later failing target cannot hide an earlier one.
type RestoreSet = StdMutex<BTreeSet<PathBuf>>;

struct SystemInner<L: BuildHostLauncher, M: ProjectModel> {
    manager: BuildHostProcessManager<L>,
    model: Arc<M>,
    config: ProjectLoadingConfig,
    client: ClientNotifier,
    watcher: Option<ProjectFileWatcher>,
    loaded: Mutex<HashMap<PathBuf, Arc<Mutex<ProjectSlot>>>>,
    diagnostics: DiagnosticsStore,
    toast_shown: AtomicBool,
}

/// Loads projects into a [`ProjectModel`] through build hosts.
pub struct ProjectSystem<L: BuildHostLauncher, M: ProjectModel> {
    inner: Arc<SystemInner<L, M>>,
    queue: BatchingWorkQueue<ProjectToLoad>,
    requeue_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl<L: BuildHostLauncher, M: ProjectModel> Clone for ProjectSystem<L, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            queue: self.queue.clone(),
            requeue_task: Arc::clone(&self.requeue_task),
        }
    }
}

impl<L: BuildHostLauncher, M: ProjectModel> ProjectSystem<L, M> {
    /// A project system without file watching.
    pub fn new(
        manager: BuildHostProcessManager<L>,
        model: Arc<M>,
        config: ProjectLoadingConfig,
        client: ClientNotifier,
    ) -> Self {
        Self::build(manager, model, config, client, None)
    }

    /// A project system that reloads projects when `watcher` reports changes.
    pub fn with_file_watcher(
        manager: BuildHostProcessManager<L>,
        model: Arc<M>,
        config: ProjectLoadingConfig,
        client: ClientNotifier,
        watcher: ProjectFileWatcher,
        requeue: mpsc::UnboundedReceiver<PathBuf>,
    ) -> Self {
        Self::build(manager, model, config, client, Some((watcher, requeue)))
    }

    fn build(
        manager: BuildHostProcessManager<L>,
        model: Arc<M>,
        config: ProjectLoadingConfig,
        client: ClientNotifier,
        watcher: Option<(ProjectFileWatcher, mpsc::UnboundedReceiver<PathBuf>)>,
    ) -> Self {
        let debounce = config.debounce();
        let (watcher, requeue) = watcher.unzip();
        let inner = Arc::new(SystemInner {
            manager,
            model,
            config,
            client,
            watcher,
            loaded: Mutex::new(HashMap::new()),
            diagnostics: DiagnosticsStore::default(),
            toast_shown: AtomicBool::new(false),
        });

        let handler_inner = Arc::clone(&inner);
        let queue = BatchingWorkQueue::new(debounce, move |batch| {
            Arc::clone(&handler_inner).load_batch(batch)
        });

        let requeue_task = requeue.map(|mut rx| {
            let queue = queue.clone();
            tokio::spawn(async move {
                while let Some(path) = rx.recv().await {
                    queue.add_work(ProjectToLoad::new(normalize_path(&path)));
                }
            })
        });

        Self {
            inner,
            queue,
            requeue_task: Arc::new(StdMutex::new(requeue_task)),
        }
    }

    #[must_use]
    pub fn model(&self) -> &Arc<M> {
        &self.inner.model
    }

    #[must_use]
    pub fn manager(&self) -> &BuildHostProcessManager<L> {
        &self.inner.manager
    }

    /// Open solutions and projects, wait until everything they pull in has
    /// loaded, then tell the client initialization is complete.
    pub async fn open(&self, paths: &[PathBuf]) {
        for path in paths {
            if is_solution(path) {
                if let Err(e) = self.open_solution(path).await {
                    let message = format!("failed to open solution '{}': {e}", path.display());
                    tracing::error!("{message}");
                    self.inner
                        .client
                        .log(DiagnosticSeverity::Error, message)
                        .await;
                }
            } else {
                self.open_projects([path.clone()]);
            }
        }
        self.wait_for_pending_loads().await;
        self.inner.client.initialization_complete().await;
    }

    /// [`open`](Self::open) for `file://` URIs. Other schemes are skipped.
    pub async fn open_uris(&self, uris: &[Url]) {
        let paths: Vec<PathBuf> = uris
            .iter()
            .filter_map(|uri| match uri.to_file_path() {
                Ok(path) => Some(path),
                Err(()) => {
                    tracing::warn!(%uri, "ignoring non-file URI");
                    None
                }
            })
            .collect();
        self.open(&paths).await;
    }

    /// Queue every project of `solution`. Returns how many were queued.
    pub async fn open_solution(&self, solution: &Path) -> Result<usize, LoadError> {
        let entries = self.inner.manager.get_projects_in_solution(solution).await?;
        tracing::info!(
            solution = %solution.display(),
            projects = entries.len(),
            "opening solution"
        );
        let count = entries.len();
        self.queue.add_work_items(entries.into_iter().map(|entry| {
            ProjectToLoad::from_solution(normalize_path(&entry.path), entry.project_guid)
        }));
        Ok(count)
    }

    pub fn open_projects(&self, projects: impl IntoIterator<Item = PathBuf>) {
        self.queue.add_work_items(
            projects
                .into_iter()
                .map(|path| ProjectToLoad::new(normalize_path(&path))),
        );
    }

    pub fn reload_project(&self, project: &Path) {
        self.queue.add_work(ProjectToLoad::new(normalize_path(project)));
    }

    /// Remove every LoadedProject of `project` from the model.
    /// Returns `false` when the project was not loaded.
    pub async fn unload_project(&self, project: &Path) -> bool {
        let project = normalize_path(project);
        let project = project.as_path();
        let Some(slot) = self.inner.loaded.lock().await.remove(project) else {
            return false;
        };
        let mut slot = slot.lock().await;
        slot.removed = true;
        for loaded in &mut slot.projects {
            loaded.dispose(self.inner.model.as_ref());
        }
        slot.projects.clear();
        self.inner.diagnostics.remove(project);
        tracing::info!(project = %project.display(), "project unloaded");
        true
    }

    /// Wait until all work queued so far, and the work it triggered, is done.
    pub async fn wait_for_pending_loads(&self) {
        self.queue.wait_until_current_batch_completes().await;
    }

    /// Project files with at least one LoadedProject, sorted.
    pub async fn loaded_project_paths(&self) -> Vec<PathBuf> {
        let slots: Vec<(PathBuf, Arc<Mutex<ProjectSlot>>)> = self
            .inner
            .loaded
            .lock()
            .await
            .iter()
            .map(|(path, slot)| (path.clone(), Arc::clone(slot)))
            .collect();
        let mut paths = Vec::new();
        for (path, slot) in slots {
            if !slot.lock().await.projects.is_empty() {
                paths.push(path);
            }
        }
        paths.sort();
        paths
    }

    #[must_use]
    pub fn diagnostics(&self) -> LoadDiagnostics {
        self.inner.diagnostics.snapshot()
    }

    /// Feed a change observed by the client into the file watcher.
    pub fn file_changed(&self, path: &Path, kind: FileChangeKind) {
        if let Some(watcher) = &self.inner.watcher {
            watcher.file_changed(&normalize_path(path), kind);
        }
    }

    /// Stop accepting work and shut the build hosts down.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        if let Some(task) = self
            .requeue_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.inner.manager.shutdown().await;
    }
}

impl<L: BuildHostLauncher, M: ProjectModel> SystemInner<L, M> {
    /// The batch handler. Returns referenced projects that still need loading.
    async fn load_batch(self: Arc<Self>, batch: Vec<ProjectToLoad>) -> Vec<ProjectToLoad> {
        let started = Instant::now();
        let attempted: HashSet<PathBuf> = batch.iter().map(|p| p.path().to_path_buf()).collect();
        tracing::info!(projects = batch.len(), "loading project batch");

        let needs_restore = Arc::new(RestoreSet::default());
        let references: BTreeSet<PathBuf> = stream::iter(batch)
            .map(|project| {
                let inner = Arc::clone(&self);
                let needs_restore = Arc::clone(&needs_restore);
                async move { inner.load_isolated(project, &needs_restore).await }
            })
            .buffer_unordered(self.config.max_concurrent_loads())
            .flat_map(stream::iter)
            .map(|path| normalize_path(&path))
            .collect()
            .await;

        let needs_restore =
            mem::take(&mut *needs_restore.lock().unwrap_or_else(PoisonError::into_inner));
        if !needs_restore.is_empty() {
            let projects: Vec<PathBuf> = needs_restore.into_iter().collect();
            if self.config.auto_restore {
                tracing::info!(projects = projects.len(), "requesting package restore");
                self.client.request_restore(projects).await;
            } else {
                tracing::info!(
                    projects = projects.len(),
                    "package restore needed; automatic restore is off"
                );
            }
        }

        let follow_ups: Vec<ProjectToLoad> = {
            let loaded = self.loaded.lock().await;
            references
                .into_iter()
                .filter(|path| !loaded.contains_key(path) && !attempted.contains(path))
                .map(ProjectToLoad::new)
                .collect()
        };
        tracing::info!(
            attempted = attempted.len(),
            follow_ups = follow_ups.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "project batch finished"
        );
        follow_ups
    }

    /// Run the pipeline for one project and return the projects it references.
    /// Failures, panics included, end here.
    async fn load_isolated(
        &self,
        project: ProjectToLoad,
        needs_restore: &RestoreSet,
    ) -> Vec<PathBuf> {
        let result = AssertUnwindSafe(self.load_project(&project, needs_restore))
            .catch_unwind()
            .await;
        let err = match result {
            Ok(Ok(references)) => return references,
            Ok(Err(e)) => e,
            Err(panic) => LoadError::Panicked {
                path: project.path().to_path_buf(),
                message: panic_message(panic.as_ref()),
            },
        };
        self.report_failure(project.path(), &err).await;
        Vec::new()
    }

    async fn load_project(
        &self,
        project: &ProjectToLoad,
        needs_restore: &RestoreSet,
    ) -> Result<Vec<PathBuf>, LoadError> {
        let started = Instant::now();
        let path = project.path();
        let language = self.config.language_for(path).ok_or_else(|| {
            LoadError::UnsupportedExtension {
                path: path.to_path_buf(),
                extension: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }
        })?;

        let selected = self.manager.get_build_host_for_project(path).await?;
        if selected.fell_back() {
            tracing::warn!(
                project = %path.display(),
                preferred = %selected.preferred,
                kind = %selected.kind,
                "loading project with fallback build host"
            );
        }
        let host = selected.host.as_ref();
        if !host.is_project_file_supported(path).await? {
            return Err(LoadError::NotSupported {
                path: path.to_path_buf(),
                kind: selected.kind,
            });
        }

        let handle = host.load_project_file(path, language).await?;
        let evaluated = self.evaluate(host, handle, path).await;
        if let Err(e) = host.unload_project_file(handle).await {
            tracing::debug!(project = %path.display(), %handle, "unloading evaluation failed: {e}");
        }
        let infos = evaluated?;

        self.apply_infos(project, selected.kind, infos, started, needs_restore)
            .await
    }

    /// Fetch diagnostics, then per-target snapshots. Any error item stops here.
    async fn evaluate<H: BuildHost>(
        &self,
        host: &H,
        handle: ProjectFileHandle,
        path: &Path,
    ) -> Result<Vec<ProjectFileInfo>, LoadError> {
        let items = host.get_diagnostic_log_items(handle).await?;
        let errors = items.iter().filter(|i| i.severity().is_error()).count();
        for item in &items {
            log_item(item);
            self.client.log(item.severity(), item.to_string()).await;
        }
        self.diagnostics.update(path, items);
        if errors > 0 {
            return Err(LoadError::Evaluation {
                path: path.to_path_buf(),
                errors,
            });
        }
        Ok(host.get_project_file_infos(handle).await?)
    }

    async fn apply_infos(
        &self,
        project: &ProjectToLoad,
        kind: BuildHostKind,
        infos: Vec<ProjectFileInfo>,
        started: Instant,
        needs_restore: &RestoreSet,
    ) -> Result<Vec<PathBuf>, LoadError> {
        let path = project.path();
        let mut references = Vec::new();
        if infos.is_empty() {
            tracing::warn!(project = %path.display(), "build host returned no project information");
            return Ok(references);
        }

        let slot = {
            let mut loaded = self.loaded.lock().await;
            Arc::clone(loaded.entry(path.to_path_buf()).or_default())
        };
        let mut slot = slot.lock().await;
        if slot.removed {
            tracing::debug!(project = %path.display(), "project unloaded during load; dropping result");
            return Ok(references);
        }

        let model = self.model.as_ref();
        let base = base_name(path);
        let multi_targeted = infos.len() > 1;
        let names: Vec<String> = infos
            .iter()
            .map(|info| display_name(&base, info, multi_targeted))
            .collect();

        // Targets that vanished, or whose display name changed, start over.
        slot.projects.retain_mut(|loaded| {
            let keep = infos.iter().zip(&names).any(|(info, name)| {
                info.target_framework.as_deref() == loaded.target_framework() && name == loaded.name()
            });
            if !keep {
                loaded.dispose(model);
            }
            keep
        });

        for (info, name) in infos.into_iter().zip(names) {
            references.extend(info.project_references.iter().map(|r| r.path.clone()));

            let index = match slot
                .projects
                .iter()
                .position(|p| p.target_framework() == info.target_framework.as_deref())
            {
                Some(index) => index,
                None => {
                    slot.projects.push(LoadedProject::create(model, &info, name));
                    slot.projects.len() - 1
                }
            };
            let watches = self.watches_for(path, &info);
            let loaded = &mut slot.projects[index];
            let (telemetry, restore) = loaded
                .update_with_new_project_info(model, &self.config, info)
                .await?;
            loaded.replace_watches(watches);
            if restore.is_needed() {
                needs_restore
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(path.to_path_buf());
            }

            tracing::info!(
                project = %path.display(),
                name = loaded.name(),
                kind = %kind,
                target_framework = loaded.target_framework().unwrap_or("-"),
                first_load = telemetry.first_load,
                documents = telemetry.documents,
                additional_documents = telemetry.additional_documents,
                dynamic_files = telemetry.dynamic_files,
                metadata_references = telemetry.metadata_references,
                project_references = telemetry.project_references,
                package_references = telemetry.package_references,
                added = telemetry.added,
                removed = telemetry.removed,
                needs_restore = restore.is_needed(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "project loaded"
            );
        }
        Ok(references)
    }

    /// Watches for one target, all owned by `project`, the path the slot is keyed on.
    fn watches_for(&self, project: &Path, info: &ProjectFileInfo) -> Vec<WatchSubscription> {
        let Some(watcher) = &self.watcher else {
            return Vec::new();
        };
        let mut watches = vec![watcher.watch(project, WatchTarget::File(project.to_path_buf()))];
        if let Some(assets) = &info.project_assets_file_path {
            watches.push(watcher.watch(project, WatchTarget::File(assets.clone())));
        }
        if !info.file_globs.is_empty()
            && let Some(root) = project.parent()
        {
            watches.push(watcher.watch(
                project,
                WatchTarget::Globs {
                    root: root.to_path_buf(),
                    globs: info.file_globs.clone(),
                },
            ));
        }
        watches
    }

    async fn report_failure(&self, path: &Path, err: &LoadError) {
        let severity = err.severity();
        if severity.is_error() {
            tracing::error!(project = %path.display(), "project load failed: {err}");
        } else {
            tracing::warn!(project = %path.display(), "project skipped: {err}");
        }

        // Evaluation failures already recorded the host's own items.
        if !matches!(err, LoadError::Evaluation { .. }) {
            self.diagnostics
                .update(path, vec![DiagnosticLogItem::new(severity, err.to_string(), path)]);
        }
        self.client.log(severity, err.to_string()).await;

        if severity.is_error() && !self.toast_shown.swap(true, Ordering::SeqCst) {
            self.client
                .show_toast(DiagnosticSeverity::Error, LOAD_FAILED_TOAST)
                .await;
        }
    }
}

fn is_solution(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ["sln", "slnf", "slnx"].iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

/// Absolute form of `path` with `.` and `..` folded away, without touching
/// the filesystem. One project file maps to one key however it was named.
fn normalize_path(path: &Path) -> PathBuf {
    let absolute = path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            _ => normalized.push(component),
        }
    }
    normalized
}

fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `Name(tfm)` for one target of a multi-targeted project, else `Name`.
fn display_name(base: &str, info: &ProjectFileInfo, multi_targeted: bool) -> String {
    match (&info.target_framework, multi_targeted) {
        (Some(tfm), true) => format!("{base}({tfm})"),
        _ => base.to_string(),
    }
}

fn log_item(item: &DiagnosticLogItem) {
    let project = item.project_file_path().display();
    match item.severity() {
        DiagnosticSeverity::Error => tracing::error!(project = %project, "{}", item.message()),
        DiagnosticSeverity::Warning => tracing::warn!(project = %project, "{}", item.message()),
        DiagnosticSeverity::Information => {
            tracing::info!(project = %project, "{}", item.message());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
