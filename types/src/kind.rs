use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flavor of out-of-process build host.
///
/// Each kind maps to one runtime the host executable runs under. At most one
/// host process per kind is alive at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildHostKind {
    /// SDK-style projects, hosted by the `dotnet` runtime.
    NetCore,
    /// Legacy projects on Windows, hosted by the desktop framework.
    NetFramework,
    /// Legacy projects everywhere else, hosted by `mono`.
    Mono,
}

impl BuildHostKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetCore => "netcore",
            Self::NetFramework => "netframework",
            Self::Mono => "mono",
        }
    }

    /// The kind that hosts non-SDK projects on the current platform.
    #[must_use]
    pub const fn legacy_for_platform() -> Self {
        if cfg!(windows) {
            Self::NetFramework
        } else {
            Self::Mono
        }
    }
}

impl fmt::Display for BuildHostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown build host kind '{0}' (expected netcore, netframework or mono)")]
pub struct ParseBuildHostKindError(String);

impl FromStr for BuildHostKind {
    type Err = ParseBuildHostKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netcore" | "dotnet" => Ok(Self::NetCore),
            "netframework" | "net472" => Ok(Self::NetFramework),
            "mono" => Ok(Self::Mono),
            _ => Err(ParseBuildHostKindError(s.to_string())),
        }
    }
}
