use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A request to (re)load one project file.
///
/// Equality and hashing consider the path only (ordinal, case-sensitive), so two
/// requests for the same file coalesce regardless of their solution identifier.
#[derive(Debug, Clone)]
pub struct ProjectToLoad {
    path: PathBuf,
    project_guid: Option<String>,
}

impl ProjectToLoad {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            project_guid: None,
        }
    }

    /// A project enumerated from a solution, carrying the solution-assigned guid.
    #[must_use]
    pub fn from_solution(path: impl Into<PathBuf>, project_guid: Option<String>) -> Self {
        Self {
            path: path.into(),
            project_guid,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn project_guid(&self) -> Option<&str> {
        self.project_guid.as_deref()
    }
}

impl PartialEq for ProjectToLoad {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for ProjectToLoad {}

impl Hash for ProjectToLoad {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for ProjectToLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// One project listed in a solution file, as reported by the build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionProjectEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub project_guid: Option<String>,
}

/// Opaque id of a project file loaded inside a build host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectFileHandle(u64);

impl ProjectFileHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A source, additional or analyzer-config document of a project.
///
/// Diffing compares documents by `file_path` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFileInfo {
    pub file_path: PathBuf,
    #[serde(default)]
    pub logical_path: Option<String>,
    #[serde(default)]
    pub is_linked: bool,
    #[serde(default)]
    pub is_generated: bool,
    #[serde(default)]
    pub folders: Vec<String>,
}

impl DocumentFileInfo {
    #[must_use]
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            logical_path: None,
            is_linked: false,
            is_generated: false,
            folders: Vec::new(),
        }
    }
}

/// A compiled assembly reference. Compared by value over all fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataReference {
    pub path: PathBuf,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub embed_interop_types: bool,
}

impl MetadataReference {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            aliases: Vec::new(),
            embed_interop_types: false,
        }
    }
}

/// A reference from one project file to another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileReference {
    pub path: PathBuf,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub reference_output_assembly: bool,
}

impl ProjectFileReference {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            aliases: Vec::new(),
            reference_output_assembly: true,
        }
    }
}

/// A declared package dependency: package id plus requested version range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageReference {
    pub name: String,
    pub version_range: String,
}

impl PackageReference {
    #[must_use]
    pub fn new(name: impl Into<String>, version_range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_range: version_range.into(),
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version_range)
    }
}

/// Item globs a project evaluates its documents from, relative to the project directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGlobs {
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub removes: Vec<String>,
}

/// Build-evaluated output for one project and target framework.
///
/// Produced fresh by every evaluation and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFileInfo {
    pub file_path: PathBuf,
    pub language: String,
    #[serde(default)]
    pub output_file_path: Option<PathBuf>,
    #[serde(default)]
    pub output_ref_file_path: Option<PathBuf>,
    #[serde(default)]
    pub target_framework: Option<String>,
    #[serde(default)]
    pub target_framework_identifier: Option<String>,
    /// Location of the restore lock file (`project.assets.json`).
    #[serde(default)]
    pub project_assets_file_path: Option<PathBuf>,
    #[serde(default)]
    pub command_line_args: Vec<String>,
    #[serde(default)]
    pub documents: Vec<DocumentFileInfo>,
    #[serde(default)]
    pub additional_documents: Vec<DocumentFileInfo>,
    #[serde(default)]
    pub analyzer_config_documents: Vec<DocumentFileInfo>,
    #[serde(default)]
    pub metadata_references: Vec<MetadataReference>,
    #[serde(default)]
    pub analyzer_references: Vec<PathBuf>,
    #[serde(default)]
    pub project_references: Vec<ProjectFileReference>,
    #[serde(default)]
    pub package_references: Vec<PackageReference>,
    #[serde(default)]
    pub file_globs: Vec<FileGlobs>,
}

impl ProjectFileInfo {
    #[must_use]
    pub fn new(
        file_path: impl Into<PathBuf>,
        language: impl Into<String>,
        target_framework: Option<&str>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            language: language.into(),
            target_framework: target_framework.map(str::to_string),
            ..Self::default()
        }
    }
}

const fn default_true() -> bool {
    true
}
