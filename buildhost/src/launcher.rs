//! Turning a [`BuildHostKind`] into a running build host process.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::process::Command;
use tokio::sync::oneshot;

use projsys_types::BuildHostKind;

use crate::error::BuildHostError;
use crate::host::{BuildHost, RemoteBuildHost};
use crate::types::BuildHostConfig;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// A launched host plus the signal that fires when its process is gone.
pub struct LaunchedHost<H> {
    pub host: Arc<H>,
    pub exited: oneshot::Receiver<()>,
}

/// Starts build host processes for the manager.
pub trait BuildHostLauncher: Send + Sync + 'static {
    type Host: BuildHost;

    fn launch(&self, kind: BuildHostKind) -> Result<LaunchedHost<Self::Host>, BuildHostError>;
}

/// Program, arguments and environment edits for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<OsString>,
    /// Path of the build host binary the command runs.
    pub host_binary: PathBuf,
    /// Whether the configured environment strip patterns apply.
    pub strip_env: bool,
}

/// Launches real build host executables from the configured directory.
pub struct ProcessLauncher {
    config: BuildHostConfig,
    strip_patterns: GlobSet,
}

impl ProcessLauncher {
    pub fn new(config: BuildHostConfig) -> Self {
        let strip_patterns = build_env_globset(&config.strip_environment);
        Self {
            config,
            strip_patterns,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BuildHostConfig {
        &self.config
    }

    /// The command line for `kind`, before `PATH` resolution.
    #[must_use]
    pub fn command_for(&self, kind: BuildHostKind) -> LaunchCommand {
        let dir = self.config.build_host_dir();
        let netfx_binary = dir.join("BuildHost-net472").join("BuildHost.exe");

        let (program, host_binary, mut args) = match kind {
            BuildHostKind::NetCore => {
                let dll = dir.join("BuildHost-netcore").join("BuildHost.dll");
                let args = vec![OsString::from("exec"), dll.clone().into_os_string()];
                (self.config.dotnet_path.clone(), dll, args)
            }
            BuildHostKind::NetFramework => (
                netfx_binary.to_string_lossy().into_owned(),
                netfx_binary,
                Vec::new(),
            ),
            BuildHostKind::Mono => {
                let args = vec![netfx_binary.clone().into_os_string()];
                (self.config.mono_path.clone(), netfx_binary, args)
            }
        };

        for (name, value) in &self.config.global_properties {
            args.push(OsString::from("--property"));
            args.push(OsString::from(format!("{name}={value}")));
        }
        if let Some(base) = &self.config.binary_log_path {
            args.push(OsString::from("--binlog"));
            args.push(binlog_path_for(base, kind).into_os_string());
        }

        LaunchCommand {
            program,
            args,
            host_binary,
            strip_env: kind == BuildHostKind::NetCore,
        }
    }

    /// Names of variables in `vars` matching the strip patterns.
    fn stripped_vars(&self, vars: impl Iterator<Item = String>) -> Vec<String> {
        vars.filter(|key| self.strip_patterns.is_match(key)).collect()
    }
}

impl BuildHostLauncher for ProcessLauncher {
    type Host = RemoteBuildHost;

    fn launch(&self, kind: BuildHostKind) -> Result<LaunchedHost<RemoteBuildHost>, BuildHostError> {
        let command = self.command_for(kind);
        if !command.host_binary.exists() {
            return Err(BuildHostError::MissingHostBinary {
                kind,
                path: command.host_binary,
            });
        }
        let program =
            which::which(&command.program).map_err(|source| BuildHostError::ExecutableNotFound {
                kind,
                program: command.program.clone(),
                source,
            })?;

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        if command.strip_env {
            for key in self.stripped_vars(env::vars().map(|(key, _)| key)) {
                tracing::trace!(%kind, %key, "removing variable from build host environment");
                cmd.env_remove(key);
            }
        }

        tracing::debug!(%kind, program = %program.display(), args = ?command.args, "launching build host");
        let child = cmd
            .spawn()
            .map_err(|source| BuildHostError::Spawn { kind, source })?;
        let (host, exited) = RemoteBuildHost::attach(kind, child, self.config.request_timeout())?;
        Ok(LaunchedHost {
            host: Arc::new(host),
            exited,
        })
    }
}

/// `build.binlog` becomes `build.netcore.binlog`, so hosts never share a log.
fn binlog_path_for(base: &Path, kind: BuildHostKind) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "msbuild".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{stem}.{kind}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{kind}.binlog"),
    };
    base.with_file_name(file_name)
}

/// Case-insensitive matcher for the strip patterns. Invalid patterns are logged and skipped.
fn build_env_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match GlobBuilder::new(pattern).case_insensitive(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!(%pattern, "ignoring environment strip pattern: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("environment strip patterns unusable: {e}");
        GlobSet::empty()
    })
}
