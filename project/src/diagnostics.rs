//! Per-project diagnostic log items from the most recent load attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use projsys_types::{DiagnosticLogItem, DiagnosticSeverity};

#[derive(Default)]
pub(crate) struct DiagnosticsStore {
    data: Mutex<HashMap<PathBuf, Vec<DiagnosticLogItem>>>,
}

impl DiagnosticsStore {
    /// Replace the items for `project`. An empty list clears the entry.
    pub fn update(&self, project: &Path, items: Vec<DiagnosticLogItem>) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if items.is_empty() {
            data.remove(project);
        } else {
            data.insert(project.to_path_buf(), items);
        }
    }

    pub fn remove(&self, project: &Path) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project);
    }

    pub fn snapshot(&self) -> LoadDiagnostics {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut projects: Vec<(PathBuf, Vec<DiagnosticLogItem>)> = data
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .collect();
        drop(data);

        // Projects with errors first, then by path.
        projects.sort_by_cached_key(|(path, items)| {
            let clean = !items.iter().any(|d| d.severity().is_error());
            (clean, path.clone())
        });

        LoadDiagnostics { projects }
    }
}

/// Immutable view of load diagnostics, grouped by project.
#[derive(Debug, Clone, Default)]
pub struct LoadDiagnostics {
    projects: Vec<(PathBuf, Vec<DiagnosticLogItem>)>,
}

impl LoadDiagnostics {
    /// Per-project items, projects with errors first.
    #[must_use]
    pub fn projects(&self) -> &[(PathBuf, Vec<DiagnosticLogItem>)] {
        &self.projects
    }

    #[must_use]
    pub fn for_project(&self, project: &Path) -> &[DiagnosticLogItem] {
        self.projects
            .iter()
            .find(|(path, _)| path == project)
            .map(|(_, items)| items.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.projects
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    /// Compact status like "E:1 W:2"; empty when there is nothing to report.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
