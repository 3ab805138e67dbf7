//! Configuration for the project loading pipeline.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `[project_loading]` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLoadingConfig {
    /// Quiet period before queued loads run as one batch.
    pub debounce_ms: u64,
    /// Upper bound on projects evaluated at once. Defaults to the number of CPUs.
    pub max_concurrent_loads: Option<usize>,
    /// Ask the client to restore packages when a batch finds unresolved references.
    pub auto_restore: bool,
    /// Extensions (without the dot) of additional files tracked as dynamic files.
    pub dynamic_file_extensions: Vec<String>,
    /// Project file extension (without the dot) to language name.
    pub extension_languages: BTreeMap<String, String>,
}

impl Default for ProjectLoadingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            max_concurrent_loads: None,
            auto_restore: true,
            dynamic_file_extensions: vec!["razor".to_string(), "cshtml".to_string()],
            extension_languages: BTreeMap::from([
                ("csproj".to_string(), "C#".to_string()),
                ("vbproj".to_string(), "Visual Basic".to_string()),
            ]),
        }
    }
}

impl ProjectLoadingConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn max_concurrent_loads(&self) -> usize {
        self.max_concurrent_loads
            .filter(|n| *n > 0)
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    /// Language for a project file, by extension, ignoring case.
    #[must_use]
    pub fn language_for(&self, project: &Path) -> Option<&str> {
        let ext = project.extension()?.to_str()?;
        self.extension_languages
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(ext))
            .map(|(_, language)| language.as_str())
    }

    #[must_use]
    pub fn is_dynamic_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.dynamic_file_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn languages_match_ignoring_case() {
        let config = ProjectLoadingConfig::default();
        assert_eq!(config.language_for(Path::new("/a/A.csproj")), Some("C#"));
        assert_eq!(config.language_for(Path::new("/a/B.VBPROJ")), Some("Visual Basic"));
        assert_eq!(config.language_for(Path::new("/a/C.fsproj")), None);
        assert_eq!(config.language_for(Path::new("/a/Makefile")), None);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let config: ProjectLoadingConfig = toml::from_str("debounce_ms = 250").unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert!(config.auto_restore);
        assert_eq!(config.extension_languages.len(), 2);
    }

    #[test]
    fn zero_concurrency_means_default() {
        let config = ProjectLoadingConfig {
            max_concurrent_loads: Some(0),
            ..ProjectLoadingConfig::default()
        };
        assert!(config.max_concurrent_loads() >= 1);

        let config = ProjectLoadingConfig {
            max_concurrent_loads: Some(3),
            ..ProjectLoadingConfig::default()
        };
        assert_eq!(config.max_concurrent_loads(), 3);
    }

    #[test]
    fn dynamic_files_by_extension() {
        let config = ProjectLoadingConfig::default();
        assert!(config.is_dynamic_file(Path::new("/a/Pages/Index.cshtml")));
        assert!(config.is_dynamic_file(Path::new("/a/App.Razor")));
        assert!(!config.is_dynamic_file(Path::new("/a/Program.cs")));
    }
}
