//! File-change classification and the optional OS watcher.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use lumen_project::{DESCRIPTOR_EXTENSION, SOURCE_EXTENSION};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};

/// Folder names whose contents never affect a build.
const IGNORED_DIRS: &[&str] = &["obj", "bin", "target", "node_modules"];

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq)]
pub enum ChangeCategory {
    Source,
    Descriptor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

impl FileChange {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        let (first, second) = match self {
            FileChange::Created(p) | FileChange::Modified(p) | FileChange::Deleted(p) => {
                (p.as_path(), None)
            }
            FileChange::Moved { from, to } => (from.as_path(), Some(to.as_path())),
        };

        std::iter::once(first).chain(second)
    }
}

/// What the watcher needs to know about the loaded workspace to classify a change.
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    pub root: PathBuf,
    pub cache_folder: PathBuf,
    /// Project folders outside `root` (extra projects added at runtime or in config).
    pub extra_roots: Vec<PathBuf>,
    /// Descriptors of the loaded graph.
    pub descriptors: HashSet<PathBuf>,
}

impl WatchConfig {
    pub fn new(root: impl Into<PathBuf>, cache_folder: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_folder: cache_folder.into(),
            ..Self::default()
        }
    }

    /// Folders an OS watcher has to cover.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.root.clone()];
        for extra in &self.extra_roots {
            if !roots.iter().any(|root| extra.starts_with(root)) {
                roots.push(extra.clone());
            }
        }
        roots
    }

    fn owning_root(&self, path: &Path) -> Option<&Path> {
        std::iter::once(&self.root)
            .chain(&self.extra_roots)
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    fn categorize_path(&self, path: &Path) -> Option<ChangeCategory> {
        if path.starts_with(&self.cache_folder) {
            return None;
        }
        if self.descriptors.contains(path) {
            return Some(ChangeCategory::Descriptor);
        }
        let root = self.owning_root(path)?;
        let relative = path.strip_prefix(root).ok()?;
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            let Component::Normal(name) = component else {
                continue;
            };
            // Only folders are filtered; the file name itself is checked by extension below.
            if components.peek().is_none() {
                break;
            }
            let name = name.to_string_lossy();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref()) {
                return None;
            }
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION) => {
                Some(ChangeCategory::Descriptor)
            }
            Some(ext) if ext.eq_ignore_ascii_case(SOURCE_EXTENSION) => Some(ChangeCategory::Source),
            _ => None,
        }
    }
}

/// The strongest category among the paths touched by `change`, or `None` when nothing relevant
/// changed.
pub fn categorize(config: &WatchConfig, change: &FileChange) -> Option<ChangeCategory> {
    change
        .paths()
        .filter_map(|path| config.categorize_path(path))
        .max()
}

/// Translate a raw `notify` event into file changes.
///
/// Split renames are not paired: a rename-from reads as a deletion and a rename-to as a creation,
/// which classifies the same way.
pub fn normalize_event(event: notify::Event) -> Vec<FileChange> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FileChange::Created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FileChange::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let mut paths = event.paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileChange::Moved { from, to }],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(FileChange::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(FileChange::Created).collect()
        }
        EventKind::Modify(_) => event.paths.into_iter().map(FileChange::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// `notify` marks dropped or overflowed events with `Flag::Rescan`; some backends send a
/// path-less `Other` instead.
pub fn requests_rescan(event: &notify::Event) -> bool {
    matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
        || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
}

/// What the OS watcher reports for one raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changes(Vec<FileChange>),
    Rescan,
}

/// Recursive OS watcher over a set of folders. Dropping it stops watching.
pub struct FileWatcher {
    watcher: notify::RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Start watching `roots`. `on_signal` runs on the backend's thread and must not block.
    pub fn start(
        roots: &[PathBuf],
        on_signal: impl Fn(WatchSignal) + Send + 'static,
    ) -> Result<Self> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if requests_rescan(&event) => on_signal(WatchSignal::Rescan),
                Ok(event) => {
                    let changes = normalize_event(event);
                    if !changes.is_empty() {
                        on_signal(WatchSignal::Changes(changes));
                    }
                }
                Err(err) => {
                    tracing::warn!(target = "lumen.workspace", error = %err, "file watcher error");
                    on_signal(WatchSignal::Rescan);
                }
            }
        })
        .context("failed to create file watcher")?;

        let mut this = Self {
            watcher,
            watched: Vec::new(),
        };
        for root in roots {
            this.watch(root)?;
        }
        Ok(this)
    }

    /// Add `root` (recursively) unless it is already covered.
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        if self.watched.iter().any(|watched| root.starts_with(watched)) {
            return Ok(());
        }
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))?;
        tracing::debug!(target = "lumen.workspace", root = %root.display(), "watching");
        self.watched.push(root.to_path_buf());
        Ok(())
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}
