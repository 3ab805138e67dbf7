//! One project, for one target framework, as it exists in the model.
//!
//! Each reload diffs the fresh [`ProjectFileInfo`] against the previous one,
//! collection by collection, and commits only the difference.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use projsys_types::{DocumentFileInfo, ProjectFileInfo};

use crate::error::LoadError;
use crate::model::{
    ProjectChange, ProjectCreationInfo, ProjectId, ProjectModel, ProjectUpdateBatch,
};
use crate::restore::{self, RestoreCheck};
use crate::types::ProjectLoadingConfig;
use crate::watcher::WatchSubscription;

/// What one update did, for the per-project load event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectLoadTelemetry {
    pub first_load: bool,
    pub documents: usize,
    pub additional_documents: usize,
    pub dynamic_files: usize,
    pub metadata_references: usize,
    pub project_references: usize,
    pub package_references: usize,
    pub added: usize,
    pub removed: usize,
}

pub struct LoadedProject {
    id: ProjectId,
    name: String,
    file_path: PathBuf,
    target_framework: Option<String>,
    previous: Option<ProjectFileInfo>,
    watches: Vec<WatchSubscription>,
    disposed: bool,
}

impl LoadedProject {
    /// Create the (empty) project in `model`. Content arrives with the first
    /// [`update_with_new_project_info`](Self::update_with_new_project_info).
    pub fn create<M: ProjectModel + ?Sized>(model: &M, info: &ProjectFileInfo, name: String) -> Self {
        let id = model.create_project(ProjectCreationInfo {
            name: name.clone(),
            file_path: info.file_path.clone(),
            language: info.language.clone(),
            target_framework: info.target_framework.clone(),
        });
        Self {
            id,
            name,
            file_path: info.file_path.clone(),
            target_framework: info.target_framework.clone(),
            previous: None,
            watches: Vec::new(),
            disposed: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    #[must_use]
    pub fn target_framework(&self) -> Option<&str> {
        self.target_framework.as_deref()
    }

    /// The snapshot most recently applied.
    #[must_use]
    pub fn last_info(&self) -> Option<&ProjectFileInfo> {
        self.previous.as_ref()
    }

    /// Apply `new` as the project's current state.
    ///
    /// Fails without touching the model when `new` describes a different
    /// project or target framework.
    pub async fn update_with_new_project_info<M: ProjectModel + ?Sized>(
        &mut self,
        model: &M,
        config: &ProjectLoadingConfig,
        new: ProjectFileInfo,
    ) -> Result<(ProjectLoadTelemetry, RestoreCheck), LoadError> {
        if new.file_path != self.file_path || new.target_framework != self.target_framework {
            let err = LoadError::IdentityMismatch {
                expected_path: self.file_path.clone(),
                expected_tfm: self.target_framework.clone(),
                actual_path: new.file_path.clone(),
                actual_tfm: new.target_framework.clone(),
            };
            tracing::error!(project = %self.name, "{err}");
            return Err(err);
        }

        let empty = ProjectFileInfo::default();
        let previous = self.previous.as_ref().unwrap_or(&empty);
        let mut batch = ProjectUpdateBatch::begin(model, self.id);
        queue_changes(&mut batch, config, previous, &new);

        let changes = batch.changes();
        let telemetry = ProjectLoadTelemetry {
            first_load: self.previous.is_none(),
            documents: new.documents.len(),
            additional_documents: new.additional_documents.len(),
            dynamic_files: split_dynamic(config, &new.additional_documents).0.len(),
            metadata_references: new.metadata_references.len(),
            project_references: new.project_references.len(),
            package_references: new.package_references.len(),
            added: changes.iter().filter(|c| c.is_add()).count(),
            removed: changes.iter().filter(|c| c.is_remove()).count(),
        };
        batch.commit();

        let restore = restore::check_unresolved_dependencies(&new, self.previous.as_ref()).await;
        self.previous = Some(new);
        Ok((telemetry, restore))
    }

    /// Replace the file watches that keep this project fresh.
    pub fn replace_watches(&mut self, watches: Vec<WatchSubscription>) {
        self.watches = watches;
    }

    /// Remove the project from the model and drop its watches. Idempotent.
    pub fn dispose<M: ProjectModel + ?Sized>(&mut self, model: &M) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.watches.clear();
        model.remove_project(self.id);
        tracing::debug!(project = %self.name, "loaded project disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

fn queue_changes<M: ProjectModel + ?Sized>(
    batch: &mut ProjectUpdateBatch<'_, M>,
    config: &ProjectLoadingConfig,
    previous: &ProjectFileInfo,
    new: &ProjectFileInfo,
) {
    // Options first so documents land in a correctly configured project.
    if new.command_line_args != previous.command_line_args {
        batch.push(ProjectChange::SetCommandLineArgs(new.command_line_args.clone()));
    }
    if new.output_file_path != previous.output_file_path
        || new.output_ref_file_path != previous.output_ref_file_path
    {
        batch.push(ProjectChange::SetOutputPaths {
            output: new.output_file_path.clone(),
            output_ref: new.output_ref_file_path.clone(),
        });
    }

    let mut adds = Vec::new();
    let mut removes = Vec::new();

    diff(
        &previous.documents,
        &new.documents,
        doc_path,
        |d| adds.push(ProjectChange::AddDocument(d.clone())),
        |d| removes.push(ProjectChange::RemoveDocument(d.file_path.clone())),
    );

    let (prev_dynamic, prev_additional) = split_dynamic(config, &previous.additional_documents);
    let (new_dynamic, new_additional) = split_dynamic(config, &new.additional_documents);
    diff(
        &prev_additional,
        &new_additional,
        |d| doc_path(d),
        |d| adds.push(ProjectChange::AddAdditionalDocument((*d).clone())),
        |d| removes.push(ProjectChange::RemoveAdditionalDocument(d.file_path.clone())),
    );
    diff(
        &prev_dynamic,
        &new_dynamic,
        |d| doc_path(d),
        |d| adds.push(ProjectChange::AddDynamicFile(d.file_path.clone())),
        |d| removes.push(ProjectChange::RemoveDynamicFile(d.file_path.clone())),
    );

    diff(
        &previous.analyzer_config_documents,
        &new.analyzer_config_documents,
        doc_path,
        |d| adds.push(ProjectChange::AddAnalyzerConfigDocument(d.clone())),
        |d| removes.push(ProjectChange::RemoveAnalyzerConfigDocument(d.file_path.clone())),
    );
    diff(
        &previous.metadata_references,
        &new.metadata_references,
        |r| r,
        |r| adds.push(ProjectChange::AddMetadataReference(r.clone())),
        |r| removes.push(ProjectChange::RemoveMetadataReference(r.clone())),
    );
    diff(
        &previous.analyzer_references,
        &new.analyzer_references,
        PathBuf::as_path,
        |p| adds.push(ProjectChange::AddAnalyzerReference(p.clone())),
        |p| removes.push(ProjectChange::RemoveAnalyzerReference(p.clone())),
    );
    diff(
        &previous.project_references,
        &new.project_references,
        |r| r,
        |r| adds.push(ProjectChange::AddProjectReference(r.clone())),
        |r| removes.push(ProjectChange::RemoveProjectReference(r.clone())),
    );

    // Removals before additions, so a moved item never exists twice.
    for change in removes.into_iter().chain(adds) {
        batch.push(change);
    }
}

fn doc_path(doc: &DocumentFileInfo) -> &Path {
    &doc.file_path
}

/// Split additional documents into (dynamic files, plain additional documents).
fn split_dynamic<'a>(
    config: &ProjectLoadingConfig,
    docs: &'a [DocumentFileInfo],
) -> (Vec<&'a DocumentFileInfo>, Vec<&'a DocumentFileInfo>) {
    docs.iter().partition(|d| config.is_dynamic_file(&d.file_path))
}

/// Report items of `new` missing from `previous` to `add`, and items of
/// `previous` missing from `new` to `remove`. Items are matched by `key`.
fn diff<'a, T, K>(
    previous: &'a [T],
    new: &'a [T],
    key: impl Fn(&'a T) -> K,
    mut add: impl FnMut(&'a T),
    mut remove: impl FnMut(&'a T),
) where
    K: Eq + Hash + Copy,
{
    let mut remaining: HashSet<K> = previous.iter().map(&key).collect();
    let mut seen = HashSet::with_capacity(new.len());
    for item in new {
        let k = key(item);
        if !seen.insert(k) {
            continue;
        }
        if !remaining.remove(&k) {
            add(item);
        }
    }
    for item in previous {
        if remaining.remove(&key(item)) {
            remove(item);
        }
    }
}
