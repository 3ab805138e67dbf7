//! BuildHostProcessManager: one live build host per kind.
//!
//! Hosts live in the `hosts` map; removal is the state transition for a dead
//! host. Each entry has a monitor task that waits for the process to exit and
//! then removes the entry, so the next request for that kind relaunches.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

use projsys_types::{BuildHostKind, SolutionProjectEntry};

use crate::classify;
use crate::error::BuildHostError;
use crate::host::BuildHost;
use crate::launcher::{BuildHostLauncher, LaunchedHost};
use crate::types::FallbackPolicy;

struct HostEntry<H> {
    host: Arc<H>,
    /// Distinguishes this launch from a later relaunch of the same kind.
    generation: u64,
    monitor: JoinHandle<()>,
}

struct Inner<L: BuildHostLauncher> {
    launcher: L,
    hosts: Mutex<HashMap<BuildHostKind, HostEntry<L::Host>>>,
    next_generation: AtomicU64,
    fallback: FallbackPolicy,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

/// A host chosen for a project, and the kind it was chosen as.
pub struct SelectedHost<H> {
    pub host: Arc<H>,
    pub kind: BuildHostKind,
    /// The kind the project asked for; differs from `kind` after a fallback.
    pub preferred: BuildHostKind,
}

impl<H> SelectedHost<H> {
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.kind != self.preferred
    }
}

/// Owns the build host processes. Cheap to clone; clones share the pool.
pub struct BuildHostProcessManager<L: BuildHostLauncher> {
    inner: Arc<Inner<L>>,
}

impl<L: BuildHostLauncher> Clone for BuildHostProcessManager<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: BuildHostLauncher> BuildHostProcessManager<L> {
    pub fn new(launcher: L, fallback: FallbackPolicy, shutdown_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                launcher,
                hosts: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                fallback,
                shutdown_timeout,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.inner.launcher
    }

    /// The live host for `kind`, launching it if none is running.
    ///
    /// Launches happen under the map lock, so concurrent callers for the same
    /// kind share a single process.
    pub async fn get_build_host(&self, kind: BuildHostKind) -> Result<Arc<L::Host>, BuildHostError> {
        let mut hosts = self.inner.hosts.lock().await;
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(BuildHostError::ShutDown);
        }
        if let Some(entry) = hosts.get(&kind) {
            return Ok(Arc::clone(&entry.host));
        }

        let LaunchedHost { host, exited } = self.inner.launcher.launch(kind)?;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let monitor = tokio::spawn(watch_for_exit(
            Arc::downgrade(&self.inner),
            kind,
            generation,
            exited,
        ));
        hosts.insert(
            kind,
            HostEntry {
                host: Arc::clone(&host),
                generation,
                monitor,
            },
        );
        tracing::debug!(%kind, generation, "build host registered");
        Ok(host)
    }

    /// Get `preferred`, falling back to the configured alternative when
    /// `preferred` reports no usable toolchain for `project`.
    pub async fn get_build_host_with_fallback(
        &self,
        preferred: BuildHostKind,
        project: &Path,
    ) -> Result<SelectedHost<L::Host>, BuildHostError> {
        let host = self.get_build_host(preferred).await?;
        if host.has_usable_toolchain(project).await? {
            return Ok(SelectedHost {
                host,
                kind: preferred,
                preferred,
            });
        }

        let mut tried = vec![preferred];
        if let Some(fallback) = self.inner.fallback.fallback_for(preferred) {
            tracing::info!(
                project = %project.display(),
                %preferred,
                %fallback,
                "no usable toolchain; trying fallback build host"
            );
            let host = self.get_build_host(fallback).await?;
            if host.has_usable_toolchain(project).await? {
                return Ok(SelectedHost {
                    host,
                    kind: fallback,
                    preferred,
                });
            }
            tried.push(fallback);
        }

        Err(BuildHostError::NoUsableToolchain {
            project: project.to_path_buf(),
            tried,
        })
    }

    /// Classify `project` from its XML and pick a host for it.
    pub async fn get_build_host_for_project(
        &self,
        project: &Path,
    ) -> Result<SelectedHost<L::Host>, BuildHostError> {
        let preferred = classify::build_host_kind_for_project(project).await?;
        self.get_build_host_with_fallback(preferred, project).await
    }

    /// Enumerate the projects of a solution file.
    ///
    /// Solutions are always read by the netcore host, with the usual fallback.
    pub async fn get_projects_in_solution(
        &self,
        solution: &Path,
    ) -> Result<Vec<SolutionProjectEntry>, BuildHostError> {
        let selected = self
            .get_build_host_with_fallback(BuildHostKind::NetCore, solution)
            .await?;
        selected.host.get_projects_in_solution(solution).await
    }

    /// Kinds with a live host, in kind order.
    pub async fn running_kinds(&self) -> Vec<BuildHostKind> {
        let mut kinds: Vec<_> = self.inner.hosts.lock().await.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub async fn is_running(&self, kind: BuildHostKind) -> bool {
        self.inner.hosts.lock().await.contains_key(&kind)
    }

    /// Shut every host down and refuse further launches.
    ///
    /// Runs to completion even if the caller's future is dropped. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.shutdown_all().await });
        if let Err(e) = task.await {
            tracing::warn!("build host shutdown task failed: {e}");
        }
    }
}

impl<L: BuildHostLauncher> Inner<L> {
    async fn shutdown_all(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let entries: Vec<_> = self.hosts.lock().await.drain().collect();
        for (kind, entry) in entries {
            self.dispose(kind, entry).await;
        }
    }

    /// Best-effort shutdown RPC, then kill if the process lingers.
    async fn dispose(&self, kind: BuildHostKind, entry: HostEntry<L::Host>) {
        let HostEntry {
            host, mut monitor, ..
        } = entry;

        match time::timeout(self.shutdown_timeout, host.shutdown()).await {
            Ok(Ok(())) => tracing::debug!(%kind, "build host acknowledged shutdown"),
            Ok(Err(e)) => {
                tracing::debug!(%kind, "shutdown request failed, terminating: {e}");
                host.terminate();
            }
            Err(_) => {
                tracing::debug!(%kind, "shutdown request timed out, terminating");
                host.terminate();
            }
        }

        if time::timeout(self.shutdown_timeout, &mut monitor).await.is_err() {
            tracing::debug!(%kind, "build host didn't exit in time, killing");
            host.terminate();
            if time::timeout(self.shutdown_timeout, &mut monitor).await.is_err() {
                monitor.abort();
            }
        }
        tracing::info!(%kind, "build host shut down");
    }
}

async fn watch_for_exit<L: BuildHostLauncher>(
    inner: Weak<Inner<L>>,
    kind: BuildHostKind,
    generation: u64,
    exited: oneshot::Receiver<()>,
) {
    // A dropped sender means the process task is gone, which is an exit too.
    let _ = exited.await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let removed = {
        let mut hosts = inner.hosts.lock().await;
        if hosts.get(&kind).is_some_and(|e| e.generation == generation) {
            hosts.remove(&kind)
        } else {
            None
        }
    };
    if let Some(entry) = removed {
        tracing::info!(%kind, "build host disconnected; the next request relaunches it");
        entry.host.terminate();
    }
}
