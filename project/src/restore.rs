//! Decides whether a project's package references are satisfied by its
//! restore lock file (`project.assets.json`), without running a restore.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use projsys_types::{PackageReference, ProjectFileInfo};

use crate::version::{self, NuGetVersion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreCheck {
    NotNeeded,
    Needed { unresolved: Vec<PackageReference> },
}

impl RestoreCheck {
    #[must_use]
    pub fn is_needed(&self) -> bool {
        matches!(self, Self::Needed { .. })
    }
}

#[derive(Deserialize)]
struct AssetsFile {
    #[serde(default)]
    libraries: HashMap<String, serde_json::Value>,
}

/// Library name (lowercased) to every version recorded for it.
type LockedLibraries = HashMap<String, Vec<NuGetVersion>>;

/// Compare `new` against `previous` and, when the dependency picture changed,
/// check the lock file on disk.
pub async fn check_unresolved_dependencies(
    new: &ProjectFileInfo,
    previous: Option<&ProjectFileInfo>,
) -> RestoreCheck {
    if let Some(previous) = previous
        && !dependencies_changed(new, previous)
    {
        return RestoreCheck::NotNeeded;
    }

    let Some(assets_path) = new.project_assets_file_path.as_deref() else {
        // Nothing to verify against; only package-less projects are fine.
        return if new.package_references.is_empty() {
            RestoreCheck::NotNeeded
        } else {
            RestoreCheck::Needed {
                unresolved: new.package_references.clone(),
            }
        };
    };

    let Some(locked) = read_lock_file(&new.file_path, assets_path).await else {
        return RestoreCheck::Needed {
            unresolved: new.package_references.clone(),
        };
    };

    let unresolved: Vec<PackageReference> = new
        .package_references
        .iter()
        .filter(|reference| !is_resolved(reference, &locked))
        .cloned()
        .collect();

    if unresolved.is_empty() {
        RestoreCheck::NotNeeded
    } else {
        let names: Vec<String> = unresolved.iter().map(ToString::to_string).collect();
        tracing::info!(
            project = %new.file_path.display(),
            unresolved = %names.join(", "),
            "project has unresolved package references"
        );
        RestoreCheck::Needed { unresolved }
    }
}

pub async fn has_unresolved_dependencies(
    new: &ProjectFileInfo,
    previous: Option<&ProjectFileInfo>,
) -> bool {
    check_unresolved_dependencies(new, previous)
        .await
        .is_needed()
}

fn dependencies_changed(new: &ProjectFileInfo, previous: &ProjectFileInfo) -> bool {
    new.target_framework != previous.target_framework
        || new.package_references.len() != previous.package_references.len()
        || new
            .package_references
            .iter()
            .any(|r| !previous.package_references.contains(r))
}

fn is_resolved(reference: &PackageReference, locked: &LockedLibraries) -> bool {
    locked
        .get(&reference.name.to_lowercase())
        .is_some_and(|versions| version::range_accepts_any(&reference.version_range, versions))
}

async fn read_lock_file(project: &Path, assets_path: &Path) -> Option<LockedLibraries> {
    let bytes = match tokio::fs::read(assets_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::info!(
                project = %project.display(),
                assets = %assets_path.display(),
                "restore lock file unavailable: {e}"
            );
            return None;
        }
    };
    let assets: AssetsFile = match serde_json::from_slice(&bytes) {
        Ok(assets) => assets,
        Err(e) => {
            tracing::warn!(
                assets = %assets_path.display(),
                "restore lock file is malformed: {e}"
            );
            return None;
        }
    };

    let mut locked = LockedLibraries::new();
    for key in assets.libraries.keys() {
        let Some((name, version)) = key.split_once('/') else {
            continue;
        };
        if let Ok(version) = version.parse() {
            locked.entry(name.to_lowercase()).or_default().push(version);
        }
    }
    Some(locked)
}
