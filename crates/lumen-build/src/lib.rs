//! Incremental per-project builds over a [`ProjectGraph`].
//!
//! Projects are visited in build order. A project whose cached artifact is at least as new as
//! its sources and descriptor, and was built from exactly those files, is loaded from disk;
//! anything else (including every project that references a project rebuilt in the same pass)
//! is recompiled against the artifacts of the projects it references.
//!
//! A project that compiles with errors has no artifact, but its outcome still carries the
//! declarations the compiler recovered from its healthy files.

mod report;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use lumen_cache::{ArtifactCache, AssemblyArtifact};
use lumen_compiler::{
    compile_guarded, emit_guarded, ArtifactReference, CompileOptions, CompileRequest, Compiler,
};
use lumen_core::{codes, CompileUnit, Diagnostic, UnitId};
use lumen_project::{Project, ProjectGraph};
use lumen_refs::ReferenceProjection;

pub use report::{BuildAction, BuildReport, ProjectOutcome};

#[derive(Debug, Clone)]
pub struct ProjectBuilder {
    compiler: Arc<dyn Compiler>,
    cache: ArtifactCache,
    options: CompileOptions,
}

impl ProjectBuilder {
    pub fn new(compiler: Arc<dyn Compiler>, cache: ArtifactCache) -> Self {
        Self {
            compiler,
            cache,
            options: CompileOptions::default(),
        }
    }

    /// Options passed to every project compilation.
    #[must_use]
    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn artifact_path(&self, project: &Project) -> PathBuf {
        self.cache.artifact_path(&project.cache_key)
    }

    /// Build (or load) every project of `graph` in order.
    ///
    /// Structural diagnostics of the graph are carried into the report first.
    pub fn build(&self, graph: &ProjectGraph, references: &ReferenceProjection) -> BuildReport {
        let started = Instant::now();
        let mut report = BuildReport {
            diagnostics: graph.diagnostics.clone(),
            source_file_count: graph.source_file_count(),
            ..BuildReport::default()
        };
        let mut pass = BuildPass::default();

        for project in &graph.projects {
            let outcome = self.build_project(project, references, &mut pass, &mut report);
            tracing::debug!(
                target = "lumen.build",
                project = %project.name,
                action = ?outcome.action,
                "project done"
            );
            if outcome.action != BuildAction::Loaded {
                pass.dirty.insert(outcome.key.clone());
            }
            if let Some(reference) = outcome.artifact_reference() {
                pass.artifacts.insert(outcome.key.clone(), reference);
            }
            report.projects.push(outcome);
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            target = "lumen.build",
            root = %graph.root.display(),
            projects = report.projects.len(),
            rebuilt = report.rebuilt().len(),
            compiles = report.compile_invocations,
            errors = report.error_codes().len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "build finished"
        );
        report
    }

    fn build_project(
        &self,
        project: &Project,
        references: &ReferenceProjection,
        pass: &mut BuildPass,
        report: &mut BuildReport,
    ) -> ProjectOutcome {
        let path = self.artifact_path(project);
        let mut outcome = ProjectOutcome {
            key: project.key().to_path_buf(),
            name: project.name.clone(),
            action: BuildAction::Failed,
            artifact: None,
            declarations: Vec::new(),
        };
        let inputs = project.freshness_inputs();

        let upstream = pass.upstream_of(project);
        let dirty_reference = upstream.iter().find(|key| pass.dirty.contains(*key));
        if let Some(reference) = dirty_reference {
            tracing::debug!(
                target = "lumen.build",
                project = %project.name,
                reference = %reference.display(),
                "rebuilding: a referenced project changed"
            );
        } else if self.cache.is_fresh(&path, &inputs) {
            match self.cache.load(&path) {
                Ok(Some(artifact)) if artifact.built_from(&inputs) => {
                    outcome.action = BuildAction::Loaded;
                    outcome.declarations = artifact.declarations().to_vec();
                    outcome.artifact = Some(artifact);
                    return outcome;
                }
                Ok(Some(_)) => {
                    tracing::debug!(
                        target = "lumen.build",
                        project = %project.name,
                        "rebuilding: the project's files were added, removed or renamed"
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        target = "lumen.build",
                        path = %path.display(),
                        error = %err,
                        "discarding unreadable artifact"
                    );
                    self.cache.invalidate(&path);
                }
            }
        }

        let units = match read_units(project) {
            Ok(units) => units,
            Err(diagnostic) => {
                report.diagnostics.push(diagnostic);
                self.cache.invalidate(&path);
                return outcome;
            }
        };
        let artifacts = pass.artifact_references(&upstream);
        let request = CompileRequest {
            units: &units,
            references,
            artifacts: &artifacts,
            options: &self.options,
        };

        report.compile_invocations += 1;
        let compilation = compile_guarded(self.compiler.as_ref(), &request);
        report.diagnostics.extend(compilation.diagnostics.iter().cloned());
        outcome.declarations = compilation.program.real_source_declarations();
        if compilation.has_errors() {
            tracing::debug!(
                target = "lumen.build",
                project = %project.name,
                errors = compilation.error_codes().len(),
                recovered = outcome.declarations.len(),
                "project has errors"
            );
            self.cache.invalidate(&path);
            return outcome;
        }

        let emitted = match emit_guarded(self.compiler.as_ref(), &compilation.program, &request) {
            Ok(emitted) => emitted,
            Err(diagnostic) => {
                report.diagnostics.push(diagnostic);
                self.cache.invalidate(&path);
                return outcome;
            }
        };

        let artifact = AssemblyArtifact::new(
            path,
            emitted.image,
            outcome.declarations.clone(),
            emitted.ir,
        )
        .with_inputs(inputs);
        if let Err(err) = self.cache.store(&artifact) {
            report.diagnostics.push(
                Diagnostic::warning(
                    codes::ARTIFACT_NOT_PERSISTED,
                    format!(
                        "artifact for `{}` could not be written to {}: {err}",
                        project.name,
                        artifact.path().display()
                    ),
                )
                .in_unit(UnitId::file(project.key())),
            );
        }

        outcome.action = BuildAction::Rebuilt;
        outcome.artifact = Some(artifact);
        outcome
    }
}

/// State carried from one project to the next within a single build.
#[derive(Debug, Default)]
struct BuildPass {
    /// Projects compiled (or failed) in this pass.
    dirty: HashSet<PathBuf>,
    artifacts: HashMap<PathBuf, ArtifactReference>,
    /// Transitive references per project key, filled as projects are visited.
    upstream: HashMap<PathBuf, Vec<PathBuf>>,
}

impl BuildPass {
    /// Transitive project references of `project`, nearest first.
    ///
    /// Every reference precedes `project` in build order, so its own upstream set is known.
    fn upstream_of(&mut self, project: &Project) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut upstream = Vec::new();
        for reference in &project.project_references {
            if seen.insert(reference.clone()) {
                upstream.push(reference.clone());
            }
            for transitive in self.upstream.get(reference).into_iter().flatten() {
                if seen.insert(transitive.clone()) {
                    upstream.push(transitive.clone());
                }
            }
        }
        self.upstream
            .insert(project.key().to_path_buf(), upstream.clone());
        upstream
    }

    fn artifact_references(&self, upstream: &[PathBuf]) -> Vec<ArtifactReference> {
        upstream
            .iter()
            .filter_map(|key| self.artifacts.get(key).cloned())
            .collect()
    }
}

fn read_units(project: &Project) -> Result<Vec<CompileUnit>, Diagnostic> {
    project
        .sources
        .iter()
        .map(|path| read_unit(path))
        .collect()
}

fn read_unit(path: &Path) -> Result<CompileUnit, Diagnostic> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(CompileUnit::new(UnitId::file(path), text)),
        Err(err) => {
            tracing::warn!(
                target = "lumen.build",
                path = %path.display(),
                error = %err,
                "failed to read source file"
            );
            Err(Diagnostic::error(
                codes::SOURCE_NOT_READABLE,
                format!("failed to read {}: {err}", path.display()),
            )
            .in_unit(UnitId::file(path)))
        }
    }
}
