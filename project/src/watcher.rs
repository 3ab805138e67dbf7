//! File watching for loaded projects.
//!
//! Each subscription ties a project to either one file (the project file, the
//! restore lock file) or a directory plus item globs. Any matching change sends
//! the project path down the requeue channel. OS watches are shared and
//! reference counted per directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use projsys_types::FileGlobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

/// What a subscription watches.
#[derive(Debug, Clone)]
pub enum WatchTarget {
    /// One file; any change to it counts.
    File(PathBuf),
    /// Files under `root` matched by item globs; only files appearing or
    /// disappearing count.
    Globs { root: PathBuf, globs: Vec<FileGlobs> },
}

enum Matcher {
    File(PathBuf),
    Globs { include: GlobSet, exclude: GlobSet },
}

impl Matcher {
    fn matches(&self, path: &Path, kind: FileChangeKind) -> bool {
        match self {
            Self::File(file) => file == path,
            Self::Globs { include, exclude } => {
                kind != FileChangeKind::Changed && include.is_match(path) && !exclude.is_match(path)
            }
        }
    }
}

struct Subscriber {
    project: PathBuf,
    matcher: Matcher,
    os_path: Option<PathBuf>,
}

struct OsWatch {
    holders: usize,
    recursive: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    os_watches: HashMap<PathBuf, OsWatch>,
}

struct Shared {
    registry: Mutex<Registry>,
    requeue_tx: mpsc::UnboundedSender<PathBuf>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, path: &Path, kind: FileChangeKind) {
        let projects: Vec<PathBuf> = self
            .registry()
            .subscribers
            .values()
            .filter(|s| s.matcher.matches(path, kind))
            .map(|s| s.project.clone())
            .collect();
        for project in projects {
            tracing::debug!(
                project = %project.display(),
                changed = %path.display(),
                ?kind,
                "watched file changed"
            );
            let _ = self.requeue_tx.send(project);
        }
    }
}

struct WatcherInner {
    shared: Arc<Shared>,
    os: Option<Mutex<RecommendedWatcher>>,
}

/// Routes file system changes to the projects that depend on them.
#[derive(Clone)]
pub struct ProjectFileWatcher {
    inner: Arc<WatcherInner>,
}

impl ProjectFileWatcher {
    /// Start an OS-backed watcher. The receiver yields project paths to reload.
    pub fn new() -> notify::Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (requeue_tx, requeue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::default(),
            requeue_tx,
        });

        let routed = Arc::clone(&shared);
        let os = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let Some(kind) = change_kind(&event.kind) else {
                    return;
                };
                for path in &event.paths {
                    routed.route(path, kind);
                }
            }
            Err(e) => tracing::warn!("file watcher error: {e}"),
        })?;

        Ok((
            Self {
                inner: Arc::new(WatcherInner {
                    shared,
                    os: Some(Mutex::new(os)),
                }),
            },
            requeue_rx,
        ))
    }

    /// A watcher with no OS backing; changes arrive only via [`file_changed`](Self::file_changed).
    #[must_use]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (requeue_tx, requeue_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: Mutex::default(),
            requeue_tx,
        });
        (
            Self {
                inner: Arc::new(WatcherInner { shared, os: None }),
            },
            requeue_rx,
        )
    }

    /// Report a change observed elsewhere (e.g. pushed by the client).
    pub fn file_changed(&self, path: &Path, kind: FileChangeKind) {
        self.inner.shared.route(path, kind);
    }

    /// Watch `target` on behalf of `project` until the subscription is dropped.
    #[must_use]
    pub fn watch(&self, project: &Path, target: WatchTarget) -> WatchSubscription {
        let (matcher, os_path, recursive) = match target {
            WatchTarget::File(file) => {
                let parent = file.parent().filter(|p| p.is_dir()).map(Path::to_path_buf);
                (Matcher::File(file), parent, false)
            }
            WatchTarget::Globs { root, globs } => {
                let (include, exclude) = build_globsets(&root, &globs);
                let os_path = root.is_dir().then_some(root);
                (Matcher::Globs { include, exclude }, os_path, true)
            }
        };

        let (id, os_mode) = {
            let mut registry = self.inner.shared.registry();
            registry.next_id += 1;
            let id = registry.next_id;
            let os_mode = os_path
                .as_deref()
                .and_then(|path| registry.acquire(path, recursive));
            registry.subscribers.insert(
                id,
                Subscriber {
                    project: project.to_path_buf(),
                    matcher,
                    os_path: os_path.clone(),
                },
            );
            (id, os_mode)
        };

        // Never call into the OS watcher with the registry held: its event
        // thread may be blocked routing an event through the same lock.
        if let (Some(path), Some(mode)) = (os_path, os_mode) {
            self.inner.with_os(|os| {
                if let Err(e) = os.watch(&path, mode) {
                    tracing::debug!(path = %path.display(), "cannot watch: {e}");
                }
            });
        }

        WatchSubscription {
            id,
            watcher: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.shared.registry().subscribers.len()
    }
}

impl Registry {
    /// Count a holder for `path`; returns the mode to (re)watch with, if any.
    fn acquire(&mut self, path: &Path, recursive: bool) -> Option<RecursiveMode> {
        let entry = self.os_watches.entry(path.to_path_buf()).or_insert(OsWatch {
            holders: 0,
            recursive: false,
        });
        entry.holders += 1;
        let needs_watch = entry.holders == 1 || (recursive && !entry.recursive);
        entry.recursive |= recursive;
        needs_watch.then_some(if entry.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        })
    }

    /// Drop subscriber `id`; returns a path that no longer needs an OS watch.
    fn release(&mut self, id: u64) -> Option<PathBuf> {
        let path = self.subscribers.remove(&id)?.os_path?;
        let watch = self.os_watches.get_mut(&path)?;
        watch.holders -= 1;
        if watch.holders > 0 {
            return None;
        }
        self.os_watches.remove(&path);
        Some(path)
    }
}

impl WatcherInner {
    fn with_os(&self, f: impl FnOnce(&mut RecommendedWatcher)) {
        if let Some(os) = &self.os {
            f(&mut os.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    fn release(&self, id: u64) {
        let unwatch = self.shared.registry().release(id);
        if let Some(path) = unwatch {
            self.with_os(|os| {
                if let Err(e) = os.unwatch(&path) {
                    tracing::debug!(path = %path.display(), "cannot unwatch: {e}");
                }
            });
        }
    }
}

/// Keeps one watch alive. Dropping it stops routing for that target.
pub struct WatchSubscription {
    id: u64,
    watcher: Weak<WatcherInner>,
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.watcher.upgrade() {
            inner.release(self.id);
        }
    }
}

fn change_kind(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Created),
        EventKind::Remove(_) => Some(FileChangeKind::Deleted),
        // A rename is a file vanishing from one path and appearing at another.
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Created),
        EventKind::Modify(_) => Some(FileChangeKind::Changed),
        _ => None,
    }
}

/// Include globs, and exclude plus remove globs, anchored at `root`.
fn build_globsets(root: &Path, globs: &[FileGlobs]) -> (GlobSet, GlobSet) {
    let mut include = GlobSetBuilder::new();
    let mut exclude = GlobSetBuilder::new();
    for set in globs {
        for pattern in &set.includes {
            add_glob(&mut include, root, pattern);
        }
        for pattern in set.excludes.iter().chain(&set.removes) {
            add_glob(&mut exclude, root, pattern);
        }
    }
    let build = |builder: GlobSetBuilder| {
        builder.build().unwrap_or_else(|e| {
            tracing::warn!(root = %root.display(), "invalid item globs: {e}");
            GlobSet::empty()
        })
    };
    (build(include), build(exclude))
}

fn add_glob(builder: &mut GlobSetBuilder, root: &Path, pattern: &str) {
    let pattern = pattern.replace('\\', "/");
    let anchored = if Path::new(&pattern).is_absolute() {
        pattern
    } else {
        format!("{}/{pattern}", root.display().to_string().trim_end_matches('/'))
    };
    match GlobBuilder::new(&anchored).literal_separator(true).build() {
        Ok(glob) => {
            builder.add(glob);
        }
        Err(e) => tracing::debug!(pattern = %anchored, "skipping item glob: {e}"),
    }
}
