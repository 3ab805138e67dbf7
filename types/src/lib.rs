//! Core domain types for projsys.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The wire shapes exchanged with the build host live here so both the RPC client and
//! the project loading pipeline can share them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod diagnostics;
mod kind;
mod project;

pub use diagnostics::{DiagnosticLogItem, DiagnosticSeverity};
pub use kind::{BuildHostKind, ParseBuildHostKindError};
pub use project::{
    DocumentFileInfo, FileGlobs, MetadataReference, PackageReference, ProjectFileHandle,
    ProjectFileInfo, ProjectFileReference, ProjectToLoad, SolutionProjectEntry,
};
