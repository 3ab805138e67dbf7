//! Project loading: from "open these projects" to an up-to-date project model.
//!
//! [`ProjectSystem`] batches load requests through a [`BatchingWorkQueue`],
//! evaluates each project in a build host picked by the
//! [`BuildHostProcessManager`](projsys_buildhost::BuildHostProcessManager),
//! and applies the result to a [`ProjectModel`] as a minimal diff
//! ([`LoadedProject`]). Package restore needs are detected from the restore
//! lock file and reported to the client in one request per batch.

pub mod client;
pub mod model;
pub mod types;
pub mod version;
pub mod watcher;

mod diagnostics;
mod error;
mod loaded_project;
mod project_system;
mod queue;
mod restore;

pub use client::{ClientEvent, ClientNotifier};
pub use diagnostics::LoadDiagnostics;
pub use error::LoadError;
pub use loaded_project::{LoadedProject, ProjectLoadTelemetry};
pub use model::{
    ProjectChange, ProjectCreationInfo, ProjectId, ProjectModel, ProjectState, ProjectUpdateBatch,
    WorkspaceModel,
};
pub use project_system::ProjectSystem;
pub use queue::{BatchingWorkQueue, DEFAULT_DEBOUNCE};
pub use restore::{RestoreCheck, check_unresolved_dependencies, has_unresolved_dependencies};
pub use types::ProjectLoadingConfig;
pub use watcher::{FileChangeKind, ProjectFileWatcher, WatchSubscription, WatchTarget};
