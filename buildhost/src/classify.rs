//! Structural project-file inspection that picks a build host kind.

use std::path::Path;

use projsys_types::BuildHostKind;

use crate::error::BuildHostError;

/// Shape of a project file as far as host selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStyle {
    /// Modern SDK-style project.
    Sdk,
    /// Pre-SDK project that needs the desktop toolchain.
    Legacy,
}

impl ProjectStyle {
    #[must_use]
    pub fn build_host_kind(self) -> BuildHostKind {
        match self {
            Self::Sdk => BuildHostKind::NetCore,
            Self::Legacy => BuildHostKind::legacy_for_platform(),
        }
    }
}

/// Classify project XML by looking only at the root element and its children.
///
/// Unparsable or rootless content counts as SDK style.
#[must_use]
pub fn classify_project_xml(text: &str) -> ProjectStyle {
    let Ok(doc) = roxmltree::Document::parse(text) else {
        return ProjectStyle::Sdk;
    };
    let root = doc.root_element();

    if root.has_attribute("Sdk") {
        return ProjectStyle::Sdk;
    }

    let is_sdk_marker = |node: roxmltree::Node<'_, '_>| match node.tag_name().name() {
        "Sdk" => true,
        "Import" => node.has_attribute("Sdk"),
        "PropertyGroup" => node.children().any(|child| {
            matches!(
                child.tag_name().name(),
                "TargetFramework" | "TargetFrameworks"
            )
        }),
        _ => false,
    };

    if root.children().filter(|n| n.is_element()).any(is_sdk_marker) {
        ProjectStyle::Sdk
    } else {
        ProjectStyle::Legacy
    }
}

/// Read `path` and pick the kind of host that should evaluate it.
pub async fn build_host_kind_for_project(path: &Path) -> Result<BuildHostKind, BuildHostError> {
    let text = tokio::fs::read(path)
        .await
        .map_err(|source| BuildHostError::ReadProject {
            path: path.to_path_buf(),
            source,
        })?;
    let style = classify_project_xml(&String::from_utf8_lossy(&text));
    tracing::trace!(project = %path.display(), ?style, "classified project file");
    Ok(style.build_host_kind())
}
