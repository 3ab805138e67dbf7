//! The in-memory project model the load pipeline writes into.
//!
//! The pipeline never touches model state directly: it queues
//! [`ProjectChange`]s on a [`ProjectUpdateBatch`] and commits them in one call,
//! so a half-applied update is never visible.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use projsys_types::{DocumentFileInfo, MetadataReference, ProjectFileReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(u64);

impl ProjectId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project-{}", self.0)
    }
}

/// What the model needs to create a project before any content is added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectCreationInfo {
    /// Display name; `Name(tfm)` for multi-targeted projects.
    pub name: String,
    pub file_path: PathBuf,
    pub language: String,
    pub target_framework: Option<String>,
}

/// One mutation of a project's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectChange {
    AddDocument(DocumentFileInfo),
    RemoveDocument(PathBuf),
    AddAdditionalDocument(DocumentFileInfo),
    RemoveAdditionalDocument(PathBuf),
    AddAnalyzerConfigDocument(DocumentFileInfo),
    RemoveAnalyzerConfigDocument(PathBuf),
    AddDynamicFile(PathBuf),
    RemoveDynamicFile(PathBuf),
    AddMetadataReference(MetadataReference),
    RemoveMetadataReference(MetadataReference),
    AddAnalyzerReference(PathBuf),
    RemoveAnalyzerReference(PathBuf),
    AddProjectReference(ProjectFileReference),
    RemoveProjectReference(ProjectFileReference),
    SetCommandLineArgs(Vec<String>),
    SetOutputPaths {
        output: Option<PathBuf>,
        output_ref: Option<PathBuf>,
    },
}

impl ProjectChange {
    #[must_use]
    pub fn is_add(&self) -> bool {
        matches!(
            self,
            Self::AddDocument(_)
                | Self::AddAdditionalDocument(_)
                | Self::AddAnalyzerConfigDocument(_)
                | Self::AddDynamicFile(_)
                | Self::AddMetadataReference(_)
                | Self::AddAnalyzerReference(_)
                | Self::AddProjectReference(_)
        )
    }

    #[must_use]
    pub fn is_remove(&self) -> bool {
        matches!(
            self,
            Self::RemoveDocument(_)
                | Self::RemoveAdditionalDocument(_)
                | Self::RemoveAnalyzerConfigDocument(_)
                | Self::RemoveDynamicFile(_)
                | Self::RemoveMetadataReference(_)
                | Self::RemoveAnalyzerReference(_)
                | Self::RemoveProjectReference(_)
        )
    }
}

/// Sink for project mutations.
///
/// `apply_changes` must apply the whole list or nothing.
pub trait ProjectModel: Send + Sync + 'static {
    fn create_project(&self, info: ProjectCreationInfo) -> ProjectId;

    fn apply_changes(&self, project: ProjectId, changes: Vec<ProjectChange>);

    fn remove_project(&self, project: ProjectId);
}

/// Changes queued against one project, applied together on [`commit`](Self::commit).
///
/// Dropping an uncommitted batch discards its changes.
pub struct ProjectUpdateBatch<'a, M: ProjectModel + ?Sized> {
    model: &'a M,
    project: ProjectId,
    changes: Vec<ProjectChange>,
    committed: bool,
}

impl<'a, M: ProjectModel + ?Sized> ProjectUpdateBatch<'a, M> {
    pub fn begin(model: &'a M, project: ProjectId) -> Self {
        Self {
            model,
            project,
            changes: Vec::new(),
            committed: false,
        }
    }

    pub fn push(&mut self, change: ProjectChange) {
        self.changes.push(change);
    }

    #[must_use]
    pub fn changes(&self) -> &[ProjectChange] {
        &self.changes
    }

    /// Apply everything queued. An empty batch does not reach the model.
    pub fn commit(mut self) -> usize {
        self.committed = true;
        let changes = std::mem::take(&mut self.changes);
        let count = changes.len();
        if count > 0 {
            self.model.apply_changes(self.project, changes);
        }
        count
    }
}

impl<M: ProjectModel + ?Sized> Drop for ProjectUpdateBatch<'_, M> {
    fn drop(&mut self) {
        if !self.committed && !self.changes.is_empty() {
            tracing::debug!(
                project = %self.project,
                discarded = self.changes.len(),
                "project update abandoned"
            );
        }
    }
}

/// Current content of one project in a [`WorkspaceModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectState {
    pub name: String,
    pub file_path: PathBuf,
    pub language: String,
    pub target_framework: Option<String>,
    pub documents: BTreeMap<PathBuf, DocumentFileInfo>,
    pub additional_documents: BTreeMap<PathBuf, DocumentFileInfo>,
    pub analyzer_config_documents: BTreeMap<PathBuf, DocumentFileInfo>,
    pub dynamic_files: BTreeSet<PathBuf>,
    pub metadata_references: BTreeSet<MetadataReference>,
    pub analyzer_references: BTreeSet<PathBuf>,
    pub project_references: BTreeSet<ProjectFileReference>,
    pub command_line_args: Vec<String>,
    pub output_file_path: Option<PathBuf>,
    pub output_ref_file_path: Option<PathBuf>,
    /// Number of change batches applied since creation.
    pub batches_applied: u64,
}

impl ProjectState {
    fn new(info: ProjectCreationInfo) -> Self {
        Self {
            name: info.name,
            file_path: info.file_path,
            language: info.language,
            target_framework: info.target_framework,
            documents: BTreeMap::new(),
            additional_documents: BTreeMap::new(),
            analyzer_config_documents: BTreeMap::new(),
            dynamic_files: BTreeSet::new(),
            metadata_references: BTreeSet::new(),
            analyzer_references: BTreeSet::new(),
            project_references: BTreeSet::new(),
            command_line_args: Vec::new(),
            output_file_path: None,
            output_ref_file_path: None,
            batches_applied: 0,
        }
    }

    fn apply(&mut self, change: ProjectChange) {
        match change {
            ProjectChange::AddDocument(doc) => {
                self.documents.insert(doc.file_path.clone(), doc);
            }
            ProjectChange::RemoveDocument(path) => {
                self.documents.remove(&path);
            }
            ProjectChange::AddAdditionalDocument(doc) => {
                self.additional_documents.insert(doc.file_path.clone(), doc);
            }
            ProjectChange::RemoveAdditionalDocument(path) => {
                self.additional_documents.remove(&path);
            }
            ProjectChange::AddAnalyzerConfigDocument(doc) => {
                self.analyzer_config_documents
                    .insert(doc.file_path.clone(), doc);
            }
            ProjectChange::RemoveAnalyzerConfigDocument(path) => {
                self.analyzer_config_documents.remove(&path);
            }
            ProjectChange::AddDynamicFile(path) => {
                self.dynamic_files.insert(path);
            }
            ProjectChange::RemoveDynamicFile(path) => {
                self.dynamic_files.remove(&path);
            }
            ProjectChange::AddMetadataReference(reference) => {
                self.metadata_references.insert(reference);
            }
            ProjectChange::RemoveMetadataReference(reference) => {
                self.metadata_references.remove(&reference);
            }
            ProjectChange::AddAnalyzerReference(path) => {
                self.analyzer_references.insert(path);
            }
            ProjectChange::RemoveAnalyzerReference(path) => {
                self.analyzer_references.remove(&path);
            }
            ProjectChange::AddProjectReference(reference) => {
                self.project_references.insert(reference);
            }
            ProjectChange::RemoveProjectReference(reference) => {
                self.project_references.remove(&reference);
            }
            ProjectChange::SetCommandLineArgs(args) => self.command_line_args = args,
            ProjectChange::SetOutputPaths { output, output_ref } => {
                self.output_file_path = output;
                self.output_ref_file_path = output_ref;
            }
        }
    }
}

/// A plain in-memory [`ProjectModel`].
#[derive(Default)]
pub struct WorkspaceModel {
    projects: Mutex<BTreeMap<ProjectId, ProjectState>>,
    next_id: AtomicU64,
}

impl WorkspaceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<ProjectState> {
        self.lock().get(&id).cloned()
    }

    /// Every project, in creation order.
    #[must_use]
    pub fn projects(&self) -> Vec<(ProjectId, ProjectState)> {
        self.lock()
            .iter()
            .map(|(id, state)| (*id, state.clone()))
            .collect()
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<(ProjectId, ProjectState)> {
        self.lock()
            .iter()
            .find(|(_, state)| state.name == name)
            .map(|(id, state)| (*id, state.clone()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ProjectId, ProjectState>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProjectModel for WorkspaceModel {
    fn create_project(&self, info: ProjectCreationInfo) -> ProjectId {
        let id = ProjectId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(project = %id, name = %info.name, "project created");
        self.lock().insert(id, ProjectState::new(info));
        id
    }

    fn apply_changes(&self, project: ProjectId, changes: Vec<ProjectChange>) {
        let mut projects = self.lock();
        let Some(state) = projects.get_mut(&project) else {
            tracing::warn!(%project, "changes for unknown project dropped");
            return;
        };
        for change in changes {
            state.apply(change);
        }
        state.batches_applied += 1;
    }

    fn remove_project(&self, project: ProjectId) {
        if let Some(state) = self.lock().remove(&project) {
            tracing::debug!(%project, name = %state.name, "project removed");
        }
    }
}
