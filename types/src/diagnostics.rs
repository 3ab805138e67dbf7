use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic produced while evaluating a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    #[serde(alias = "info")]
    Information,
}

impl DiagnosticSeverity {
    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single log item the build host reported for a project, or one the
/// load pipeline synthesized for a failed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticLogItem {
    severity: DiagnosticSeverity,
    message: String,
    project_file_path: PathBuf,
}

impl DiagnosticLogItem {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: impl Into<String>,
        project_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            project_file_path: project_file_path.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, project_file_path: impl Into<PathBuf>) -> Self {
        Self::new(DiagnosticSeverity::Error, message, project_file_path)
    }

    #[must_use]
    pub fn warning(message: impl Into<String>, project_file_path: impl Into<PathBuf>) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, project_file_path)
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn project_file_path(&self) -> &Path {
        &self.project_file_path
    }
}

impl fmt::Display for DiagnosticLogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            self.project_file_path.display(),
            self.severity,
            self.message
        )
    }
}
