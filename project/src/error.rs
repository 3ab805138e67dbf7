use std::path::PathBuf;

use thiserror::Error;

use projsys_buildhost::BuildHostError;
use projsys_types::{BuildHostKind, DiagnosticSeverity};

/// Why one project in a batch did not load.
///
/// Never escapes the per-project boundary of a batch; the pipeline turns it
/// into a diagnostic log item for that project.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    BuildHost(#[from] BuildHostError),

    #[error(
        "cannot open project '{}' because the file extension '{extension}' is not associated with a language",
        path.display()
    )]
    UnsupportedExtension { path: PathBuf, extension: String },

    #[error("the {kind} build host does not support project '{}'", path.display())]
    NotSupported { path: PathBuf, kind: BuildHostKind },

    #[error("evaluating '{}' reported {errors} error(s)", path.display())]
    Evaluation { path: PathBuf, errors: usize },

    #[error(
        "loaded project identity changed: expected '{}' ({}), got '{}' ({})",
        expected_path.display(),
        expected_tfm.as_deref().unwrap_or("no target framework"),
        actual_path.display(),
        actual_tfm.as_deref().unwrap_or("no target framework"),
    )]
    IdentityMismatch {
        expected_path: PathBuf,
        expected_tfm: Option<String>,
        actual_path: PathBuf,
        actual_tfm: Option<String>,
    },

    #[error("loading '{}' panicked: {message}", path.display())]
    Panicked { path: PathBuf, message: String },
}

impl LoadError {
    /// Projects the pipeline declines to open are warnings; everything else failed.
    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        match self {
            Self::UnsupportedExtension { .. } | Self::NotSupported { .. } => {
                DiagnosticSeverity::Warning
            }
            _ => DiagnosticSeverity::Error,
        }
    }
}
