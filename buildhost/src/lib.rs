//! Out-of-process build host management.
//!
//! A [`BuildHostProcessManager`] keeps at most one build host process alive per
//! [`BuildHostKind`](projsys_types::BuildHostKind), launched on demand by a
//! [`BuildHostLauncher`] and spoken to through the [`BuildHost`] trait. The
//! production host is [`RemoteBuildHost`]: JSON-RPC framed with
//! `Content-Length` headers over the child's stdin/stdout.

pub mod codec;
pub mod protocol;
pub mod types;

mod classify;
mod connection;
mod error;
mod host;
mod launcher;
mod manager;

pub use classify::{ProjectStyle, build_host_kind_for_project, classify_project_xml};
pub use connection::RpcConnection;
pub use error::{BuildHostError, RpcError};
pub use host::{BuildHost, RemoteBuildHost};
pub use launcher::{BuildHostLauncher, LaunchCommand, LaunchedHost, ProcessLauncher};
pub use manager::{BuildHostProcessManager, SelectedHost};
pub use types::{BuildHostConfig, FallbackPolicy};
