use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use lumen_core::{codes, Diagnostic, UnitId};
use walkdir::WalkDir;

use crate::descriptor::{
    parse_descriptor, ProjectDescriptor, DESCRIPTOR_EXTENSION, SOURCE_EXTENSION,
};
use crate::model::{Project, ProjectGraph};
use crate::ProjectError;

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Never treat a descriptor in the root folder as the root project.
    pub skip_auto_project_discovery: bool,
    /// Additional descriptors loaded as root projects (absolute, or relative to the root).
    pub extra_projects: Vec<PathBuf>,
}

/// Directory names never searched for sources.
const SKIPPED_DIRS: &[&str] = &["obj", "bin", "target", "node_modules"];

/// Load the project graph rooted at `root` in build order.
///
/// Structural problems (missing or cyclic references, unreadable descriptors) are reported in
/// [`ProjectGraph::diagnostics`]; only an unusable root folder is an error.
pub fn load_graph(
    root: impl AsRef<Path>,
    options: &LoadOptions,
) -> Result<ProjectGraph, ProjectError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ProjectError::MissingRoot {
            root: root.to_path_buf(),
        });
    }
    let root = std::fs::canonicalize(root).map_err(|source| ProjectError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let io_err = |source| ProjectError::Io {
        path: root.clone(),
        source,
    };
    let root_descriptors =
        lumen_core::files_with_extension(&root, DESCRIPTOR_EXTENSION)
            .map_err(io_err)?;

    let mut loader = GraphLoader::default();
    match (options.skip_auto_project_discovery, root_descriptors.as_slice()) {
        (false, [descriptor]) => {
            loader.visit(descriptor.clone());
        }
        _ => {
            if root_descriptors.len() > 1 && !options.skip_auto_project_discovery {
                tracing::debug!(
                    target = "lumen.project",
                    root = %root.display(),
                    descriptors = root_descriptors.len(),
                    "several descriptors in the root folder; using top-level sources only"
                );
            }
            let sources = lumen_core::files_with_extension(&root, SOURCE_EXTENSION)
                .map_err(io_err)?;
            loader.push(Project {
                name: folder_name(&root),
                root: root.clone(),
                descriptor: None,
                sources,
                project_references: Vec::new(),
                package_references: Vec::new(),
                cache_key: lumen_core::cache_file_stem(&root),
            });
        }
    }

    for extra in &options.extra_projects {
        let path = if extra.is_absolute() {
            extra.clone()
        } else {
            root.join(extra)
        };
        let path = normalize(&path);
        if !path.is_file() {
            loader.diagnostics.push(
                Diagnostic::warning(
                    codes::MISSING_PROJECT_REFERENCE,
                    format!("project `{}` was not found", path.display()),
                )
                .in_unit(UnitId::file(&path)),
            );
            continue;
        }
        loader.visit(path);
    }

    let graph = ProjectGraph {
        root,
        projects: loader.order,
        diagnostics: loader.diagnostics,
    };
    tracing::debug!(
        target = "lumen.project",
        root = %graph.root.display(),
        projects = graph.projects.len(),
        sources = graph.source_file_count(),
        diagnostics = graph.diagnostics.len(),
        "loaded project graph"
    );
    Ok(graph)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
    Failed,
}

#[derive(Debug, Default)]
struct GraphLoader {
    states: HashMap<PathBuf, VisitState>,
    order: Vec<Project>,
    diagnostics: Vec<Diagnostic>,
}

impl GraphLoader {
    fn push(&mut self, project: Project) {
        self.states
            .insert(project.key().to_path_buf(), VisitState::Done);
        self.order.push(project);
    }

    /// Depth-first post-order walk: a project is pushed only after all of its references.
    /// Returns whether the project at `path` ended up in the graph.
    fn visit(&mut self, path: PathBuf) -> bool {
        match self.states.get(&path) {
            Some(VisitState::Done) => return true,
            Some(VisitState::Failed) => return false,
            Some(VisitState::InProgress) => unreachable!("cycles are caught before recursing"),
            None => {}
        }

        let descriptor = match parse_descriptor(&path) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(
                    target = "lumen.project",
                    path = %path.display(),
                    error = %err,
                    "skipping project with unreadable descriptor"
                );
                self.diagnostics.push(
                    Diagnostic::error(codes::INVALID_PROJECT_DESCRIPTOR, err.to_string())
                        .in_unit(UnitId::file(&path)),
                );
                self.states.insert(path, VisitState::Failed);
                return false;
            }
        };

        self.states.insert(path.clone(), VisitState::InProgress);
        let mut references = Vec::new();
        for include in &descriptor.project_references {
            let target = resolve_reference(&descriptor, include);
            if !target.is_file() {
                tracing::warn!(
                    target = "lumen.project",
                    project = %path.display(),
                    reference = %target.display(),
                    "dropping reference to missing project"
                );
                self.diagnostics.push(
                    Diagnostic::warning(
                        codes::MISSING_PROJECT_REFERENCE,
                        format!("referenced project `{}` was not found", target.display()),
                    )
                    .in_unit(UnitId::file(&path)),
                );
                continue;
            }
            if self.states.get(&target) == Some(&VisitState::InProgress) {
                tracing::warn!(
                    target = "lumen.project",
                    project = %path.display(),
                    reference = %target.display(),
                    "dropping cyclic project reference"
                );
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::CYCLIC_PROJECT_REFERENCE,
                        format!(
                            "reference from `{}` to `{}` forms a cycle",
                            path.display(),
                            target.display()
                        ),
                    )
                    .in_unit(UnitId::file(&path)),
                );
                continue;
            }
            if self.visit(target.clone()) && !references.contains(&target) {
                references.push(target);
            }
        }

        let root = descriptor.dir().to_path_buf();
        let sources = match collect_project_sources(&root) {
            Ok(sources) => sources,
            Err(err) => {
                tracing::warn!(
                    target = "lumen.project",
                    path = %root.display(),
                    error = %err,
                    "failed to list project sources"
                );
                self.diagnostics.push(
                    Diagnostic::error(codes::INVALID_PROJECT_DESCRIPTOR, err.to_string())
                        .in_unit(UnitId::file(&path)),
                );
                self.states.insert(path, VisitState::Failed);
                return false;
            }
        };

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| folder_name(&root));
        self.push(Project {
            name,
            root,
            cache_key: lumen_core::cache_file_stem(&path),
            descriptor: Some(path),
            sources,
            project_references: references,
            package_references: descriptor.package_references,
        });
        true
    }
}

fn resolve_reference(descriptor: &ProjectDescriptor, include: &str) -> PathBuf {
    let include = include.replace('\\', "/");
    normalize(&descriptor.dir().join(include))
}

/// Canonical path when it exists, otherwise a lexical normalisation of `.` and `..`.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Recursive source listing for a descriptor-driven project.
///
/// Sub-folders holding their own descriptor belong to that project and are not descended into.
fn collect_project_sources(root: &Path) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut sources = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
            return false;
        }
        !contains_descriptor(entry.path())
    }) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext == SOURCE_EXTENSION)
        {
            sources.push(entry.into_path());
        }
    }
    sources.sort();
    Ok(sources)
}

fn contains_descriptor(dir: &Path) -> bool {
    lumen_core::files_with_extension(dir, DESCRIPTOR_EXTENSION)
        .map(|found| !found.is_empty())
        .unwrap_or(false)
}

/// Paths of every descriptor in `graph`, for change categorisation.
pub fn descriptor_set(graph: &ProjectGraph) -> HashSet<PathBuf> {
    graph.descriptors().into_iter().collect()
}
