use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_cache::AssemblyArtifact;
use lumen_compiler::{ArtifactReference, Declaration};
use lumen_core::Diagnostic;

/// How a project's artifact was obtained during one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildAction {
    /// Inputs were unchanged and the cached artifact loaded.
    Loaded,
    /// The project was compiled and its artifact rewritten.
    Rebuilt,
    /// Compilation produced errors or the sources could not be read; no artifact.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub key: PathBuf,
    pub name: String,
    pub action: BuildAction,
    pub artifact: Option<AssemblyArtifact>,
    /// Declarations from the project's sources. For a failed compile these are the ones the
    /// compiler still recovered; empty when the sources could not be read or compiled at all.
    pub declarations: Vec<Declaration>,
}

impl ProjectOutcome {
    pub fn artifact_reference(&self) -> Option<ArtifactReference> {
        let artifact = self.artifact.as_ref()?;
        Some(ArtifactReference {
            name: self.name.clone(),
            path: artifact.path().to_path_buf(),
            declarations: artifact.declarations().to_vec(),
        })
    }
}

/// Everything one build pass over a project graph produced, in build order.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub projects: Vec<ProjectOutcome>,
    pub diagnostics: Vec<Diagnostic>,
    /// Number of times the compile black box was invoked.
    pub compile_invocations: usize,
    pub source_file_count: usize,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn has_errors(&self) -> bool {
        lumen_core::has_errors(&self.diagnostics)
    }

    /// Codes of every error diagnostic, in report order.
    pub fn error_codes(&self) -> Vec<String> {
        self.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.code.clone())
            .collect()
    }

    pub fn outcome(&self, key: &Path) -> Option<&ProjectOutcome> {
        self.projects.iter().find(|outcome| outcome.key == key)
    }

    pub fn artifact(&self, key: &Path) -> Option<&AssemblyArtifact> {
        self.outcome(key)?.artifact.as_ref()
    }

    /// Qualified names declared by the project at `key`, best effort when it failed.
    pub fn declared_names(&self, key: &Path) -> Vec<String> {
        self.outcome(key)
            .map(|outcome| {
                outcome
                    .declarations
                    .iter()
                    .map(|decl| decl.qualified_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every project artifact, as references for compilations that build on the workspace.
    pub fn artifact_references(&self) -> Vec<ArtifactReference> {
        self.projects
            .iter()
            .filter_map(ProjectOutcome::artifact_reference)
            .collect()
    }

    /// `(project key, artifact)` for every project that has one.
    pub fn artifacts(&self) -> impl Iterator<Item = (&Path, &AssemblyArtifact)> {
        self.projects
            .iter()
            .filter_map(|outcome| Some((outcome.key.as_path(), outcome.artifact.as_ref()?)))
    }

    pub fn keys_with(&self, action: BuildAction) -> Vec<PathBuf> {
        self.projects
            .iter()
            .filter(|outcome| outcome.action == action)
            .map(|outcome| outcome.key.clone())
            .collect()
    }

    pub fn rebuilt(&self) -> Vec<PathBuf> {
        self.keys_with(BuildAction::Rebuilt)
    }

    pub fn loaded(&self) -> Vec<PathBuf> {
        self.keys_with(BuildAction::Loaded)
    }
}
