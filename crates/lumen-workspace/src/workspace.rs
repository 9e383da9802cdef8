use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use anyhow::{Context, Result};
use async_channel::Receiver;
use lumen_build::ProjectBuilder;
use lumen_cache::ArtifactCache;
use lumen_compiler::{CompileOptions, Compiler};
use lumen_config::{LumenConfig, SessionOptions, SnippetConfig, WorkspaceSettings};
use lumen_core::{codes, Diagnostic};
use lumen_index::{OperationCatalog, SymbolEntry};
use lumen_project::{descriptor_set, load_graph, LoadOptions, PackageReference, ProjectGraph};
use lumen_refs::{ClosureResolver, LibraryLoader, ManifestLibraryLoader};
use lumen_snippets::{SnippetEngine, SnippetOutcome, SnippetSettings};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ReloadEvent, ReloadStatus, Subscribers};
use crate::packages::{NoopPackageResolver, PackageResolver};
use crate::reload::{ReloadQueue, ReloadWorker};
use crate::watch::{categorize, FileChange, FileWatcher, WatchConfig, WatchSignal};
use crate::WorkspaceError;

/// Catalog slot holding the snippet session's operations.
pub const SNIPPETS_SLOT: &str = "snippets";

const PROJECT_SLOT_PREFIX: &str = "project:";

fn project_slot(key: &Path) -> String {
    format!("{PROJECT_SLOT_PREFIX}{}", key.display())
}

/// Documentation-facing view of a resolved operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    pub name: String,
    pub qualified_name: String,
    pub namespace: String,
    /// Where the operation was declared: a file path or `snippet:<id>`.
    pub source: String,
    pub documentation: Option<String>,
    pub attributes: Vec<String>,
    pub deprecated: bool,
}

impl From<&SymbolEntry> for OperationMetadata {
    fn from(entry: &SymbolEntry) -> Self {
        Self {
            name: entry.leaf_name().to_string(),
            qualified_name: entry.qualified_name.clone(),
            namespace: entry.namespace().to_string(),
            source: entry.source.to_string(),
            documentation: entry.documentation.clone(),
            attributes: entry.attributes.clone(),
            deprecated: entry.deprecated,
        }
    }
}

/// Configures and opens a [`Workspace`].
pub struct WorkspaceBuilder {
    config: LumenConfig,
    compiler: Arc<dyn Compiler>,
    loader: Option<Arc<dyn LibraryLoader>>,
    package_resolver: Arc<dyn PackageResolver>,
    compile_options: CompileOptions,
}

impl WorkspaceBuilder {
    pub fn new(config: LumenConfig, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            config,
            compiler,
            loader: None,
            package_resolver: Arc::new(NoopPackageResolver),
            compile_options: CompileOptions::default(),
        }
    }

    /// Library loader for reference seeds; defaults to manifests under the configured search
    /// paths.
    #[must_use]
    pub fn library_loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    #[must_use]
    pub fn package_resolver(mut self, resolver: Arc<dyn PackageResolver>) -> Self {
        self.package_resolver = resolver;
        self
    }

    /// Options for project builds (executable output, entry point, capability).
    #[must_use]
    pub fn compile_options(mut self, options: CompileOptions) -> Self {
        self.compile_options = options;
        self
    }

    pub fn open(self) -> Result<Workspace> {
        let mut config = self.config;
        let cwd = std::env::current_dir().context("failed to read the current directory")?;
        config.resolve_paths(&cwd);

        let configured_root = config.workspace.root_folder.clone();
        let root = std::fs::canonicalize(&configured_root).with_context(|| {
            format!("failed to open workspace root {}", configured_root.display())
        })?;
        let cache_folder = rebase(&config.workspace.cache_folder(), &configured_root, &root);
        let settings = WorkspaceSettings {
            root_folder: root.clone(),
            cache_folder: Some(cache_folder.clone()),
            projects: config
                .workspace
                .projects
                .iter()
                .map(|project| rebase(project, &configured_root, &root))
                .collect(),
            ..config.workspace.clone()
        };

        let packages = settings
            .packages
            .iter()
            .map(|coordinate| coordinate.parse::<PackageReference>())
            .collect::<Result<Vec<_>, _>>()
            .context("invalid package in workspace config")?;

        let session = SessionOptions::load(&root).unwrap_or_else(|err| {
            tracing::warn!(
                target = "lumen.workspace",
                error = %err,
                "ignoring unreadable session options"
            );
            SessionOptions::for_root(&root)
        });

        let loader = self.loader.unwrap_or_else(|| {
            Arc::new(ManifestLibraryLoader::new(
                config.references.search_paths.clone(),
            ))
        });
        let resolver = match config.references.known_irrelevant.clone() {
            Some(names) => ClosureResolver::with_known_irrelevant(loader, names),
            None => ClosureResolver::new(loader),
        };
        let cache = ArtifactCache::new(&cache_folder);
        let mut engine = SnippetEngine::new(
            Arc::clone(&self.compiler),
            resolver,
            cache.clone(),
            snippet_settings(&config.snippets),
        );
        let reference_diagnostics =
            engine.add_reference_names(config.references.libraries.iter().map(String::as_str));

        let root_label = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        let inner = Arc::new(Inner {
            root_label,
            builder: ProjectBuilder::new(self.compiler, cache).with_options(self.compile_options),
            package_resolver: self.package_resolver,
            pipeline: Mutex::new(()),
            snippets: Mutex::new(engine),
            state: Mutex::new(WorkspaceState {
                extra_projects: settings.projects.clone(),
                packages,
                last_diagnostics: reference_diagnostics,
                ..WorkspaceState::default()
            }),
            watch_config: Mutex::new(WatchConfig::new(&root, &cache_folder)),
            watcher: Mutex::new(None),
            subscribers: Subscribers::default(),
            session: Mutex::new(session),
            root,
            settings,
        });

        let worker = {
            let inner = Arc::clone(&inner);
            ReloadWorker::spawn(move || {
                if let Err(err) = inner.reload() {
                    tracing::warn!(target = "lumen.workspace", error = %err, "reload failed");
                }
            })
            .context("failed to spawn the reload worker")?
        };

        inner.reload().context("initial workspace load failed")?;

        if inner.settings.monitor_for_changes {
            let roots = inner.watch_config().watch_roots();
            let weak = Arc::downgrade(&inner);
            let queue = worker.queue().clone();
            let watcher = FileWatcher::start(&roots, move |signal| {
                on_watch_signal(&weak, &queue, signal);
            })?;
            *inner.watcher() = Some(watcher);
        }

        tracing::info!(
            target = "lumen.workspace",
            root = %inner.root.display(),
            watching = inner.settings.monitor_for_changes,
            "workspace opened"
        );
        Ok(Workspace { inner, worker })
    }
}

fn rebase(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(relative) => to.join(relative),
        Err(_) => path.to_path_buf(),
    }
}

fn snippet_settings(config: &SnippetConfig) -> SnippetSettings {
    let mut settings = SnippetSettings::default();
    if let Some(namespace) = &config.namespace {
        settings.namespace = namespace.clone();
    }
    if let Some(aliases) = config.auto_open_aliases() {
        settings.auto_open = aliases;
    }
    if let Some(codes) = &config.suppressed_codes {
        settings.suppressed_codes = codes.iter().cloned().collect();
    }
    settings
}

fn on_watch_signal(inner: &Weak<Inner>, queue: &ReloadQueue, signal: WatchSignal) {
    let relevant = match signal {
        WatchSignal::Rescan => true,
        WatchSignal::Changes(changes) => match inner.upgrade() {
            Some(inner) => inner.is_relevant(&changes),
            None => false,
        },
    };
    if relevant {
        queue.request();
    }
}

/// An open workspace: the project graph, its builds, the snippet session and the operation
/// catalog over both.
///
/// Every compiler invocation (project builds and snippet compiles) runs under one pipeline lock.
/// Reloads requested through [`Workspace::request_reload`] run on a dedicated worker with at most
/// one pending request.
pub struct Workspace {
    inner: Arc<Inner>,
    worker: ReloadWorker,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // The watcher callback only holds a weak reference, but stop OS events before the worker.
        self.inner.watcher().take();
    }
}

impl Workspace {
    /// Open the workspace rooted at `root`, reading its `lumen.toml` if present.
    ///
    /// The config's `[logging]` section installs the process-wide tracing subscriber unless one
    /// was installed already.
    pub fn open(root: impl AsRef<Path>, compiler: Arc<dyn Compiler>) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref()).with_context(|| {
            format!("failed to open workspace root {}", root.as_ref().display())
        })?;
        let (config, path) = lumen_config::load_for_workspace(&root)
            .with_context(|| format!("failed to load config for {}", root.display()))?;
        lumen_config::init_tracing(&config.logging);
        if let Some(path) = path {
            tracing::debug!(target = "lumen.workspace", config = %path.display(), "using config");
        }
        WorkspaceBuilder::new(config, compiler).open()
    }

    pub fn builder(config: LumenConfig, compiler: Arc<dyn Compiler>) -> WorkspaceBuilder {
        WorkspaceBuilder::new(config, compiler)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn settings(&self) -> &WorkspaceSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> Receiver<ReloadEvent> {
        self.inner.subscribers.subscribe()
    }

    /// Reload on the calling thread, waiting for any compile in flight.
    pub fn reload_now(&self) -> Result<ReloadEvent, WorkspaceError> {
        self.inner.reload()
    }

    /// Ask the worker to reload. Requests made while a reload is pending are folded into it.
    pub fn request_reload(&self) -> Result<(), WorkspaceError> {
        if self.worker.queue().request() {
            Ok(())
        } else {
            Err(WorkspaceError::WorkerStopped)
        }
    }

    /// Request a reload when any of `changes` affects the workspace. Returns whether one was
    /// requested.
    pub fn apply_file_changes(&self, changes: &[FileChange]) -> bool {
        if !self.inner.is_relevant(changes) {
            return false;
        }
        self.worker.queue().request()
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watcher().is_some()
    }

    pub fn last_reload(&self) -> Option<ReloadEvent> {
        self.inner.state().last_reload.clone()
    }

    /// Diagnostics of the most recent snippet compile or reload.
    pub fn last_diagnostics(&self) -> Vec<Diagnostic> {
        self.inner.state().last_diagnostics.clone()
    }

    /// Compile a snippet against the accepted history and the workspace's project artifacts.
    pub fn compile_snippet(&self, id: &str, text: &str) -> SnippetOutcome {
        let _pipeline = self.inner.pipeline();
        let outcome = self.inner.snippets().compile(id, text);
        let mut state = self.inner.state();
        if let Some(artifact) = &outcome.artifact {
            state.catalog.publish(SNIPPETS_SLOT, artifact);
        }
        state.last_diagnostics = outcome.diagnostics.clone();
        outcome
    }

    /// Qualified names declared by accepted snippets.
    pub fn snippet_declarations(&self) -> Vec<String> {
        self.inner.snippets().declared_names()
    }

    /// Load libraries by name into the session's reference closure.
    pub fn add_references<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Diagnostic> {
        let _pipeline = self.inner.pipeline();
        self.inner.snippets().add_reference_names(names)
    }

    /// Operations from workspace projects and snippets, deprecated ones last.
    pub fn available_operations(&self) -> Vec<String> {
        qualified_names(self.inner.state().catalog.entries())
    }

    /// Operations from workspace projects only.
    pub fn workspace_operations(&self) -> Vec<String> {
        qualified_names(
            self.inner
                .state()
                .catalog
                .entries_where(|slot| slot.starts_with(PROJECT_SLOT_PREFIX)),
        )
    }

    pub fn snippet_operations(&self) -> Vec<String> {
        qualified_names(
            self.inner
                .state()
                .catalog
                .entries_where(|slot| slot == SNIPPETS_SLOT),
        )
    }

    pub fn operations_by_namespace(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.state().catalog.by_namespace()
    }

    pub fn resolve(&self, name: &str) -> Option<SymbolEntry> {
        self.inner.state().catalog.resolve(name)
    }

    pub fn operation_metadata(&self, name: &str) -> Option<OperationMetadata> {
        self.resolve(name).as_ref().map(OperationMetadata::from)
    }

    /// Add a project descriptor (absolute or relative to the root) as an extra root project and
    /// request a reload. Returns the resolved descriptor path.
    pub fn add_project(&self, descriptor: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        let descriptor = descriptor.as_ref();
        let path = if descriptor.is_absolute() {
            descriptor.to_path_buf()
        } else {
            self.inner.root.join(descriptor)
        };
        if !path.is_file() {
            return Err(WorkspaceError::MissingProject { path });
        }
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        {
            let mut state = self.inner.state();
            if !state.extra_projects.contains(&path) {
                state.extra_projects.push(path.clone());
            }
        }
        tracing::info!(target = "lumen.workspace", project = %path.display(), "project added");
        self.request_reload()?;
        Ok(path)
    }

    /// Descriptors of every loaded project, in build order.
    pub fn projects(&self) -> Vec<PathBuf> {
        self.inner
            .state()
            .graph
            .as_ref()
            .map(ProjectGraph::descriptors)
            .unwrap_or_default()
    }

    /// Record a package (`Name` or `Name::Version`) and extend the reference closure with the
    /// libraries it resolves to.
    pub fn add_package(&self, coordinate: &str) -> Result<Vec<Diagnostic>, WorkspaceError> {
        let package: PackageReference = coordinate.parse()?;
        {
            let mut state = self.inner.state();
            if !state.packages.contains(&package) {
                state.packages.push(package.clone());
            }
        }
        let _pipeline = self.inner.pipeline();
        Ok(self.inner.resolve_packages(&[package]))
    }

    /// Packages added to the session or referenced by loaded projects, as `Name::Version`.
    pub fn packages(&self) -> Vec<String> {
        let state = self.inner.state();
        let from_graph = state
            .graph
            .as_ref()
            .map(ProjectGraph::package_references)
            .unwrap_or_default();
        let all: BTreeSet<String> = state
            .packages
            .iter()
            .chain(&from_graph)
            .map(ToString::to_string)
            .collect();
        all.into_iter().collect()
    }

    pub fn option(&self, key: &str) -> Option<Value> {
        self.inner.session().get(key).cloned()
    }

    /// Set a session option, returning the previous value. Call [`Workspace::save_options`] to
    /// persist.
    pub fn set_option(&self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.inner.session().set(key, value)
    }

    pub fn save_options(&self) -> Result<(), WorkspaceError> {
        Ok(self.inner.session().save()?)
    }
}

fn qualified_names(entries: Vec<SymbolEntry>) -> Vec<String> {
    entries
        .into_iter()
        .map(|entry| entry.qualified_name)
        .collect()
}

/// Shared by the public handle, the reload worker and the watcher callback.
///
/// Lock order: `pipeline` first, then at most one of `snippets` or `state` at a time.
struct Inner {
    root: PathBuf,
    root_label: String,
    settings: WorkspaceSettings,
    builder: ProjectBuilder,
    package_resolver: Arc<dyn PackageResolver>,
    pipeline: Mutex<()>,
    snippets: Mutex<SnippetEngine<Arc<dyn LibraryLoader>>>,
    state: Mutex<WorkspaceState>,
    watch_config: Mutex<WatchConfig>,
    watcher: Mutex<Option<FileWatcher>>,
    subscribers: Subscribers,
    session: Mutex<SessionOptions>,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    extra_projects: Vec<PathBuf>,
    /// Packages added explicitly, in insertion order.
    packages: Vec<PackageReference>,
    /// Packages already handed to the resolver, successfully or not.
    resolved_packages: HashSet<PackageReference>,
    graph: Option<ProjectGraph>,
    catalog: OperationCatalog,
    last_diagnostics: Vec<Diagnostic>,
    last_reload: Option<ReloadEvent>,
}

impl Inner {
    fn pipeline(&self) -> MutexGuard<'_, ()> {
        self.pipeline
            .lock()
            .expect("workspace pipeline mutex poisoned")
    }

    fn snippets(&self) -> MutexGuard<'_, SnippetEngine<Arc<dyn LibraryLoader>>> {
        self.snippets
            .lock()
            .expect("workspace snippet engine mutex poisoned")
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().expect("workspace state mutex poisoned")
    }

    fn watch_config(&self) -> MutexGuard<'_, WatchConfig> {
        self.watch_config
            .lock()
            .expect("workspace watch config mutex poisoned")
    }

    fn watcher(&self) -> MutexGuard<'_, Option<FileWatcher>> {
        self.watcher
            .lock()
            .expect("workspace watcher mutex poisoned")
    }

    fn session(&self) -> MutexGuard<'_, SessionOptions> {
        self.session
            .lock()
            .expect("workspace session options mutex poisoned")
    }

    fn is_relevant(&self, changes: &[FileChange]) -> bool {
        let config = self.watch_config();
        changes.iter().any(|change| categorize(&config, change).is_some())
    }

    fn reload(&self) -> Result<ReloadEvent, WorkspaceError> {
        let _pipeline = self.pipeline();
        let started = Instant::now();

        let options = LoadOptions {
            skip_auto_project_discovery: self.settings.skip_auto_project_discovery,
            extra_projects: self.state().extra_projects.clone(),
        };
        let graph = match load_graph(&self.root, &options) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::warn!(
                    target = "lumen.workspace",
                    root = %self.root.display(),
                    error = %err,
                    "failed to load project graph"
                );
                let event = ReloadEvent {
                    root_label: self.root_label.clone(),
                    status: ReloadStatus::Error,
                    source_file_count: 0,
                    project_count: 0,
                    error_codes: Vec::new(),
                    elapsed: started.elapsed(),
                };
                self.state().last_reload = Some(event.clone());
                self.subscribers.publish(&event);
                return Err(err.into());
            }
        };

        let mut packages = graph.package_references();
        packages.extend(self.state().packages.iter().cloned());
        let package_diagnostics = self.resolve_packages(&packages);

        let projection = self.snippets().closure().projection();
        let report = self.builder.build(&graph, &projection);
        self.snippets()
            .set_artifact_references(report.artifact_references());

        let mut diagnostics = report.diagnostics.clone();
        diagnostics.extend(package_diagnostics);
        let error_codes: Vec<String> = diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.code.clone())
            .collect();
        let event = ReloadEvent {
            root_label: self.root_label.clone(),
            status: if error_codes.is_empty() {
                ReloadStatus::Ok
            } else {
                ReloadStatus::Error
            },
            source_file_count: report.source_file_count,
            project_count: graph.projects.len(),
            error_codes,
            elapsed: started.elapsed(),
        };

        self.refresh_watch_config(&graph);
        {
            let mut state = self.state();
            let live: HashSet<String> = report
                .artifacts()
                .map(|(key, _)| project_slot(key))
                .collect();
            state
                .catalog
                .retain_slots(|slot| slot == SNIPPETS_SLOT || live.contains(slot));
            for (key, artifact) in report.artifacts() {
                state.catalog.publish(&project_slot(key), artifact);
            }
            state.graph = Some(graph);
            state.last_diagnostics = diagnostics;
            state.last_reload = Some(event.clone());
        }

        tracing::info!(
            target = "lumen.workspace",
            root = %self.root.display(),
            status = ?event.status,
            projects = event.project_count,
            files = event.source_file_count,
            compiles = report.compile_invocations,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "workspace reloaded"
        );
        self.subscribers.publish(&event);
        Ok(event)
    }

    /// Hand packages not seen before to the resolver and extend the snippet closure with what
    /// they provide. Failures become `LMN0300` warnings.
    fn resolve_packages(&self, packages: &[PackageReference]) -> Vec<Diagnostic> {
        let pending: Vec<PackageReference> = {
            let mut state = self.state();
            packages
                .iter()
                .filter(|package| state.resolved_packages.insert((*package).clone()))
                .cloned()
                .collect()
        };

        let mut seeds = Vec::new();
        let mut diagnostics = Vec::new();
        for package in &pending {
            match self.package_resolver.resolve(package) {
                Ok(handles) => {
                    tracing::debug!(
                        target = "lumen.workspace",
                        package = %package,
                        libraries = handles.len(),
                        "package resolved"
                    );
                    seeds.extend(handles);
                }
                Err(err) => {
                    tracing::warn!(
                        target = "lumen.workspace",
                        package = %package,
                        error = %err,
                        "package could not be resolved"
                    );
                    diagnostics.push(Diagnostic::warning(
                        codes::LIBRARY_NOT_LOADED,
                        format!("package `{package}` could not be resolved: {err}"),
                    ));
                }
            }
        }
        self.snippets().add_references(&seeds);
        diagnostics
    }

    fn refresh_watch_config(&self, graph: &ProjectGraph) {
        let extra_roots: Vec<PathBuf> = graph
            .projects
            .iter()
            .filter(|project| !project.root.starts_with(&self.root))
            .map(|project| project.root.clone())
            .collect();
        {
            let mut config = self.watch_config();
            config.descriptors = descriptor_set(graph);
            config.extra_roots = extra_roots.clone();
        }
        if let Some(watcher) = self.watcher().as_mut() {
            for root in &extra_roots {
                if let Err(err) = watcher.watch(root) {
                    tracing::warn!(target = "lumen.workspace", error = %err, "failed to extend watch");
                }
            }
        }
    }
}
