use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lumen_core::Diagnostic;
use serde::{Deserialize, Serialize};

/// External library coordinate, written `Name` or `Name::Version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageReference {
    pub name: String,
    pub version: Option<String>,
}

impl PackageReference {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}::{version}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid package reference `{0}`; expected `Name` or `Name::Version`")]
pub struct InvalidPackageReference(pub String);

impl FromStr for PackageReference {
    type Err = InvalidPackageReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (name, version) = match trimmed.split_once("::") {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (trimmed, None),
        };
        if name.is_empty() || version.is_some_and(str::is_empty) {
            return Err(InvalidPackageReference(s.to_string()));
        }
        Ok(Self::new(name, version.map(str::to_string)))
    }
}

/// One node of the workspace project graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    /// Folder the project's sources are collected from.
    pub root: PathBuf,
    pub descriptor: Option<PathBuf>,
    /// Source files, sorted.
    pub sources: Vec<PathBuf>,
    /// Descriptor paths of referenced projects that made it into the graph.
    pub project_references: Vec<PathBuf>,
    pub package_references: Vec<PackageReference>,
    /// Filesystem-safe stable name of this project's artifact.
    pub cache_key: String,
}

impl Project {
    /// Identity of the project inside a graph: its descriptor, or its root for descriptor-less
    /// projects.
    pub fn key(&self) -> &Path {
        self.descriptor.as_deref().unwrap_or(&self.root)
    }

    /// Files whose timestamps decide whether this project's artifact is fresh.
    pub fn freshness_inputs(&self) -> Vec<PathBuf> {
        let mut inputs = self.sources.clone();
        inputs.extend(self.descriptor.iter().cloned());
        inputs
    }
}

/// Projects of a workspace in build order (every project after its references).
#[derive(Debug, Clone, Default)]
pub struct ProjectGraph {
    pub root: PathBuf,
    pub projects: Vec<Project>,
    /// Structural problems found while loading (missing or cyclic references, bad descriptors).
    pub diagnostics: Vec<Diagnostic>,
}

impl ProjectGraph {
    pub fn get(&self, key: &Path) -> Option<&Project> {
        self.projects.iter().find(|project| project.key() == key)
    }

    pub fn source_file_count(&self) -> usize {
        self.projects.iter().map(|project| project.sources.len()).sum()
    }

    /// Every package reference across the graph, deduplicated and sorted.
    pub fn package_references(&self) -> Vec<PackageReference> {
        let mut packages: Vec<PackageReference> = self
            .projects
            .iter()
            .flat_map(|project| project.package_references.iter().cloned())
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }

    /// Descriptor paths of every project that has one.
    pub fn descriptors(&self) -> Vec<PathBuf> {
        self.projects
            .iter()
            .filter_map(|project| project.descriptor.clone())
            .collect()
    }
}
