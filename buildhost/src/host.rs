//! The remote build host interface and its process-backed implementation.

use std::future::Future;
use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;

use projsys_types::{
    BuildHostKind, DiagnosticLogItem, ProjectFileHandle, ProjectFileInfo, SolutionProjectEntry,
};

use crate::connection::RpcConnection;
use crate::error::BuildHostError;
use crate::protocol::{
    self, HandleParams, LoadProjectFileParams, ProjectFileParams, SolutionParams,
};

/// Operations the load pipeline invokes on a build host.
///
/// Implementations must tolerate concurrent calls; the transport multiplexes them.
pub trait BuildHost: Send + Sync + 'static {
    fn kind(&self) -> BuildHostKind;

    /// Whether this host's toolchain can evaluate `project` (e.g. the SDK it
    /// asks for is installed).
    fn has_usable_toolchain(
        &self,
        project: &Path,
    ) -> impl Future<Output = Result<bool, BuildHostError>> + Send;

    fn is_project_file_supported(
        &self,
        project: &Path,
    ) -> impl Future<Output = Result<bool, BuildHostError>> + Send;

    fn get_projects_in_solution(
        &self,
        solution: &Path,
    ) -> impl Future<Output = Result<Vec<SolutionProjectEntry>, BuildHostError>> + Send;

    fn load_project_file(
        &self,
        project: &Path,
        language: &str,
    ) -> impl Future<Output = Result<ProjectFileHandle, BuildHostError>> + Send;

    fn get_diagnostic_log_items(
        &self,
        handle: ProjectFileHandle,
    ) -> impl Future<Output = Result<Vec<DiagnosticLogItem>, BuildHostError>> + Send;

    fn get_project_file_infos(
        &self,
        handle: ProjectFileHandle,
    ) -> impl Future<Output = Result<Vec<ProjectFileInfo>, BuildHostError>> + Send;

    fn unload_project_file(
        &self,
        handle: ProjectFileHandle,
    ) -> impl Future<Output = Result<(), BuildHostError>> + Send;

    /// Ask the host to exit on its own.
    fn shutdown(&self) -> impl Future<Output = Result<(), BuildHostError>> + Send;

    /// Kill the host process. Idempotent; a no-op once the process is gone.
    fn terminate(&self);
}

/// A build host running as a child process, spoken to over its stdio.
pub struct RemoteBuildHost {
    kind: BuildHostKind,
    connection: RpcConnection,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl RemoteBuildHost {
    /// Take ownership of a freshly spawned child.
    ///
    /// Returns the host and a receiver that resolves once the process has exited.
    pub(crate) fn attach(
        kind: BuildHostKind,
        mut child: Child,
        request_timeout: Duration,
    ) -> Result<(Self, oneshot::Receiver<()>), BuildHostError> {
        let stdin = child.stdin.take().ok_or(BuildHostError::MissingStdio {
            kind,
            stream: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(BuildHostError::MissingStdio {
            kind,
            stream: "stdout",
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(kind, stderr));
        }

        let pid = child.id();
        let connection = RpcConnection::start(kind.as_str(), stdout, stdin, request_timeout);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => log_exit(kind, status),
                // A dropped sender kills too: the host handle is gone.
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(%kind, "killing build host: {e}");
                    }
                    tracing::debug!(%kind, "build host terminated");
                }
            }
            let _ = exited_tx.send(());
        });

        tracing::info!(%kind, pid, "build host started");
        Ok((
            Self {
                kind,
                connection,
                kill_tx: Mutex::new(Some(kill_tx)),
            },
            exited_rx,
        ))
    }
}

fn log_exit(kind: BuildHostKind, status: io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => tracing::debug!(%kind, "build host exited"),
        Ok(status) => tracing::warn!(%kind, %status, "build host exited unexpectedly"),
        Err(e) => tracing::warn!(%kind, "waiting for build host: {e}"),
    }
}

async fn forward_stderr(kind: BuildHostKind, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(%kind, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::trace!(%kind, "build host stderr closed: {e}");
                break;
            }
        }
    }
}

impl BuildHost for RemoteBuildHost {
    fn kind(&self) -> BuildHostKind {
        self.kind
    }

    async fn has_usable_toolchain(&self, project: &Path) -> Result<bool, BuildHostError> {
        self.connection
            .request(
                protocol::HAS_USABLE_TOOLCHAIN,
                Some(ProjectFileParams {
                    project_file_path: project,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(self.kind, protocol::HAS_USABLE_TOOLCHAIN))
    }

    async fn is_project_file_supported(&self, project: &Path) -> Result<bool, BuildHostError> {
        self.connection
            .request(
                protocol::IS_PROJECT_FILE_SUPPORTED,
                Some(ProjectFileParams {
                    project_file_path: project,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(
                self.kind,
                protocol::IS_PROJECT_FILE_SUPPORTED,
            ))
    }

    async fn get_projects_in_solution(
        &self,
        solution: &Path,
    ) -> Result<Vec<SolutionProjectEntry>, BuildHostError> {
        self.connection
            .request(
                protocol::GET_PROJECTS_IN_SOLUTION,
                Some(SolutionParams {
                    solution_file_path: solution,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(
                self.kind,
                protocol::GET_PROJECTS_IN_SOLUTION,
            ))
    }

    async fn load_project_file(
        &self,
        project: &Path,
        language: &str,
    ) -> Result<ProjectFileHandle, BuildHostError> {
        self.connection
            .request(
                protocol::LOAD_PROJECT_FILE,
                Some(LoadProjectFileParams {
                    project_file_path: project,
                    language_name: language,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(self.kind, protocol::LOAD_PROJECT_FILE))
    }

    async fn get_diagnostic_log_items(
        &self,
        handle: ProjectFileHandle,
    ) -> Result<Vec<DiagnosticLogItem>, BuildHostError> {
        self.connection
            .request(
                protocol::GET_DIAGNOSTIC_LOG_ITEMS,
                Some(HandleParams {
                    project_file: handle,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(
                self.kind,
                protocol::GET_DIAGNOSTIC_LOG_ITEMS,
            ))
    }

    async fn get_project_file_infos(
        &self,
        handle: ProjectFileHandle,
    ) -> Result<Vec<ProjectFileInfo>, BuildHostError> {
        self.connection
            .request(
                protocol::GET_PROJECT_FILE_INFOS,
                Some(HandleParams {
                    project_file: handle,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(
                self.kind,
                protocol::GET_PROJECT_FILE_INFOS,
            ))
    }

    async fn unload_project_file(&self, handle: ProjectFileHandle) -> Result<(), BuildHostError> {
        self.connection
            .request(
                protocol::UNLOAD_PROJECT_FILE,
                Some(HandleParams {
                    project_file: handle,
                }),
            )
            .await
            .map_err(BuildHostError::rpc(self.kind, protocol::UNLOAD_PROJECT_FILE))
    }

    async fn shutdown(&self) -> Result<(), BuildHostError> {
        let result = self
            .connection
            .request::<(), ()>(protocol::SHUTDOWN, None)
            .await
            .map_err(BuildHostError::rpc(self.kind, protocol::SHUTDOWN));
        self.connection.close().await;
        result
    }

    fn terminate(&self) {
        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = kill_tx {
            let _ = tx.send(());
        }
    }
}
