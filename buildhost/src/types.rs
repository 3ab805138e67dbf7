//! Configuration consumed by the launcher and the process manager.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use projsys_types::BuildHostKind;

/// Settings shared by every build host launch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildHostConfig {
    /// Directory containing `BuildHost-netcore/` and `BuildHost-net472/`.
    /// Default: `~/.projsys/buildhost`.
    pub build_host_dir: Option<PathBuf>,
    /// `dotnet` executable, resolved through `PATH`.
    pub dotnet_path: String,
    /// `mono` executable, resolved through `PATH`.
    pub mono_path: String,
    /// Binary log destination; each kind inserts its name before the extension.
    pub binary_log_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Environment variable patterns removed before launching the netcore host.
    pub strip_environment: Vec<String>,
    /// Passed to every launch as `--property Name=Value`, sorted by name.
    pub global_properties: BTreeMap<String, String>,
    pub fallback: FallbackPolicy,
}

impl Default for BuildHostConfig {
    fn default() -> Self {
        Self {
            build_host_dir: None,
            dotnet_path: "dotnet".to_string(),
            mono_path: "mono".to_string(),
            binary_log_path: None,
            request_timeout_secs: 300,
            shutdown_timeout_secs: 2,
            strip_environment: vec!["MSBUILD*".to_string(), "DOTNET_HOST_PATH".to_string()],
            global_properties: BTreeMap::new(),
            fallback: FallbackPolicy::default(),
        }
    }
}

impl BuildHostConfig {
    #[must_use]
    pub fn build_host_dir(&self) -> PathBuf {
        self.build_host_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".projsys")
                .join("buildhost")
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Which kind to try when the preferred kind has no usable toolchain.
///
/// Defaults to the legacy kind of the current platform for netcore projects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FallbackPolicy(BTreeMap<BuildHostKind, BuildHostKind>);

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self(BTreeMap::from([(
            BuildHostKind::NetCore,
            BuildHostKind::legacy_for_platform(),
        )]))
    }
}

impl FallbackPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn with(mut self, preferred: BuildHostKind, fallback: BuildHostKind) -> Self {
        self.0.insert(preferred, fallback);
        self
    }

    /// Fallback for `preferred`, never `preferred` itself.
    #[must_use]
    pub fn fallback_for(&self, preferred: BuildHostKind) -> Option<BuildHostKind> {
        self.0.get(&preferred).copied().filter(|k| *k != preferred)
    }
}
