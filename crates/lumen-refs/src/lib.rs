//! Transitive reference closure for compiled libraries.
//!
//! Starting from a set of seed libraries, [`ClosureResolver`] walks every dependency it can
//! load and tags each one as *possibly relevant* (it may contribute guest-language types) or
//! *irrelevant* (a known host/runtime library, or something only reachable through one).
//!
//! The resulting [`ReferenceClosure`] feeds two views to the compiler via
//! [`ReferenceProjection`]: the full handle list for the host linker and the relevant subset
//! for semantic analysis.

mod manifest;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen_core::{codes, Diagnostic};
use thiserror::Error;

pub use manifest::{LibraryManifest, ManifestLibraryLoader, MANIFEST_EXTENSION};

/// Library names that are never part of the guest language's own type system.
pub const DEFAULT_KNOWN_IRRELEVANT: &[&str] = &[
    "mscorlib",
    "netstandard",
    "System.Private.CoreLib",
    "System.Runtime",
    "System.Runtime.Serialization",
    "System.Text.Json",
    "Newtonsoft.Json",
];

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library `{name}` was not found in any search path")]
    NotFound { name: String },
    #[error("failed to read library manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid library manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
}

#[derive(Debug)]
struct LibraryData {
    identity: String,
    location: PathBuf,
    dependencies: Vec<String>,
}

/// A loaded binary unit: where it lives and which libraries it depends on.
///
/// Cloning is cheap. Equality and hashing use the fully-qualified identity only.
#[derive(Clone)]
pub struct LibraryHandle(Arc<LibraryData>);

impl LibraryHandle {
    pub fn new(
        identity: impl Into<String>,
        location: impl Into<PathBuf>,
        dependencies: Vec<String>,
    ) -> Self {
        Self(Arc::new(LibraryData {
            identity: identity.into(),
            location: location.into(),
            dependencies,
        }))
    }

    /// Fully-qualified identity, e.g. `Contoso.Math, Version=1.2.0`.
    pub fn identity(&self) -> &str {
        &self.0.identity
    }

    /// Identity without any `, Key=Value` qualifiers.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.0.identity)
    }

    pub fn location(&self) -> &Path {
        &self.0.location
    }

    /// Names of the libraries this one depends on directly.
    pub fn dependencies(&self) -> &[String] {
        &self.0.dependencies
    }
}

impl PartialEq for LibraryHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.identity == other.0.identity
    }
}

impl Eq for LibraryHandle {}

impl Hash for LibraryHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.identity.hash(state);
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("identity", &self.0.identity)
            .field("location", &self.0.location)
            .finish()
    }
}

fn simple_name(identity: &str) -> &str {
    identity.split(',').next().unwrap_or(identity).trim()
}

/// Loads library metadata by name.
pub trait LibraryLoader: Send + Sync + fmt::Debug {
    fn load(&self, name: &str) -> Result<LibraryHandle, LibraryError>;
}

impl<T: LibraryLoader + ?Sized> LibraryLoader for Arc<T> {
    fn load(&self, name: &str) -> Result<LibraryHandle, LibraryError> {
        (**self).load(name)
    }
}

#[derive(Debug, Clone)]
struct ClosureEntry {
    handle: LibraryHandle,
    relevant: bool,
}

/// Mapping from library location to its "possibly relevant" flag, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ReferenceClosure {
    entries: Vec<ClosureEntry>,
    by_location: HashMap<PathBuf, usize>,
}

impl ReferenceClosure {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, location: &Path) -> bool {
        self.by_location.contains_key(location)
    }

    /// Relevance flag recorded for `location`, if it is part of the closure.
    pub fn is_relevant(&self, location: &Path) -> Option<bool> {
        self.by_location
            .get(location)
            .map(|&idx| self.entries[idx].relevant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LibraryHandle, bool)> {
        self.entries.iter().map(|entry| (&entry.handle, entry.relevant))
    }

    /// Locations of every library in the closure.
    pub fn key_set(&self) -> BTreeSet<PathBuf> {
        self.by_location.keys().cloned().collect()
    }

    pub fn projection(&self) -> ReferenceProjection {
        ReferenceProjection {
            linker: self.entries.iter().map(|e| e.handle.clone()).collect(),
            semantic: self
                .entries
                .iter()
                .filter(|e| e.relevant)
                .map(|e| e.handle.clone())
                .collect(),
        }
    }

    /// Records `handle` unless its location is already present. Returns `true` when inserted.
    fn insert(&mut self, handle: LibraryHandle, relevant: bool) -> bool {
        if self.by_location.contains_key(handle.location()) {
            return false;
        }
        self.by_location
            .insert(handle.location().to_path_buf(), self.entries.len());
        self.entries.push(ClosureEntry { handle, relevant });
        true
    }
}

impl PartialEq for ReferenceClosure {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|entry| {
                other.is_relevant(entry.handle.location()) == Some(entry.relevant)
            })
    }
}

impl Eq for ReferenceClosure {}

/// The two read-only views of a closure handed to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceProjection {
    /// Every library in the closure, for the host-runtime linker.
    pub linker: Vec<LibraryHandle>,
    /// Only libraries flagged possibly relevant, for semantic analysis.
    pub semantic: Vec<LibraryHandle>,
}

impl ReferenceProjection {
    /// Locations of every library in the projection.
    pub fn key_set(&self) -> BTreeSet<PathBuf> {
        self.linker
            .iter()
            .map(|handle| handle.location().to_path_buf())
            .collect()
    }
}

/// Computes and incrementally extends [`ReferenceClosure`]s.
#[derive(Debug)]
pub struct ClosureResolver<L> {
    loader: L,
    known_irrelevant: BTreeSet<String>,
}

impl<L: LibraryLoader> ClosureResolver<L> {
    pub fn new(loader: L) -> Self {
        Self::with_known_irrelevant(
            loader,
            DEFAULT_KNOWN_IRRELEVANT.iter().map(|s| s.to_string()),
        )
    }

    pub fn with_known_irrelevant(loader: L, names: impl IntoIterator<Item = String>) -> Self {
        Self {
            loader,
            known_irrelevant: names.into_iter().collect(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn is_known_irrelevant(&self, identity: &str) -> bool {
        self.known_irrelevant.contains(simple_name(identity))
    }

    /// Load seed libraries by name. Seeds that cannot be loaded are skipped and reported.
    pub fn load_seeds<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> (Vec<LibraryHandle>, Vec<Diagnostic>) {
        let mut seeds = Vec::new();
        let mut diagnostics = Vec::new();
        for name in names {
            match self.loader.load(name) {
                Ok(handle) => seeds.push(handle),
                Err(err) => {
                    tracing::warn!(
                        target = "lumen.refs",
                        library = name,
                        error = %err,
                        "skipping reference that could not be loaded"
                    );
                    diagnostics.push(Diagnostic::warning(
                        codes::LIBRARY_NOT_LOADED,
                        format!("reference `{name}` could not be loaded: {err}"),
                    ));
                }
            }
        }
        (seeds, diagnostics)
    }

    pub fn resolve(&self, seeds: &[LibraryHandle]) -> ReferenceClosure {
        self.extend(&ReferenceClosure::default(), seeds)
    }

    /// Union of `existing` with everything reachable from `seeds`.
    ///
    /// Libraries already in `existing` are neither re-visited nor re-flagged, so only the new
    /// frontier is traversed.
    pub fn extend(&self, existing: &ReferenceClosure, seeds: &[LibraryHandle]) -> ReferenceClosure {
        let mut closure = existing.clone();
        let mut unloadable = HashSet::new();
        for seed in seeds {
            let relevant = !self.is_known_irrelevant(seed.identity());
            self.visit(&mut closure, &mut unloadable, seed.clone(), relevant);
        }
        tracing::debug!(
            target = "lumen.refs",
            before = existing.len(),
            after = closure.len(),
            "extended reference closure"
        );
        closure
    }

    // The first path to reach a library decides its flag: it is recorded before its
    // dependencies are expanded, and recorded libraries are never revisited.
    fn visit(
        &self,
        closure: &mut ReferenceClosure,
        unloadable: &mut HashSet<String>,
        handle: LibraryHandle,
        relevant: bool,
    ) {
        if !closure.insert(handle.clone(), relevant) {
            return;
        }

        for name in handle.dependencies() {
            if unloadable.contains(name) {
                continue;
            }
            let dependency = match self.loader.load(name) {
                Ok(dependency) => dependency,
                Err(err) => {
                    tracing::warn!(
                        target = "lumen.refs",
                        library = %name,
                        parent = handle.identity(),
                        error = %err,
                        "omitting dependency that could not be loaded"
                    );
                    unloadable.insert(name.clone());
                    continue;
                }
            };
            let child_relevant = relevant && !self.is_known_irrelevant(dependency.identity());
            self.visit(closure, unloadable, dependency, child_relevant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity_only() {
        let a = LibraryHandle::new("Lib.A", "/one/Lib.A.json", vec![]);
        let b = LibraryHandle::new("Lib.A", "/two/Lib.A.json", vec!["X".into()]);
        assert_eq!(a, b);
        assert_eq!(
            LibraryHandle::new("Lib.A, Version=1.0", "/x", vec![]).simple_name(),
            "Lib.A"
        );
    }
}
