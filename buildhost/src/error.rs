use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use projsys_types::BuildHostKind;

use crate::codec::CodecError;
use crate::protocol::RemoteError;

/// Failure of a single request on an [`RpcConnection`](crate::RpcConnection).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("build host returned an error: {0}")]
    Remote(RemoteError),
    #[error("connection to build host closed")]
    ConnectionClosed,
    #[error("'{method}' timed out after {}s", after.as_secs())]
    Timeout { method: String, after: Duration },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("serializing request: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("unexpected result shape for '{method}': {source}")]
    InvalidResponse {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum BuildHostError {
    #[error("{program} not found for the {kind} build host: {source}")]
    ExecutableNotFound {
        kind: BuildHostKind,
        program: String,
        #[source]
        source: which::Error,
    },
    #[error("build host binary for {kind} is missing at {}", path.display())]
    MissingHostBinary { kind: BuildHostKind, path: PathBuf },
    #[error("spawning the {kind} build host: {source}")]
    Spawn {
        kind: BuildHostKind,
        #[source]
        source: io::Error,
    },
    #[error("the {kind} build host did not expose {stream}")]
    MissingStdio {
        kind: BuildHostKind,
        stream: &'static str,
    },
    #[error("{method} on the {kind} build host failed: {source}")]
    Rpc {
        kind: BuildHostKind,
        method: &'static str,
        #[source]
        source: RpcError,
    },
    #[error(
        "no usable toolchain to load '{}' (tried {})",
        project.display(),
        join_kinds(tried)
    )]
    NoUsableToolchain {
        project: PathBuf,
        tried: Vec<BuildHostKind>,
    },
    #[error("reading project file '{}': {source}", path.display())]
    ReadProject {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("build host manager has been shut down")]
    ShutDown,
}

impl BuildHostError {
    pub(crate) fn rpc(kind: BuildHostKind, method: &'static str) -> impl FnOnce(RpcError) -> Self {
        move |source| Self::Rpc {
            kind,
            method,
            source,
        }
    }
}

fn join_kinds(kinds: &[BuildHostKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
