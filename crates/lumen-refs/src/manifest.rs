use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{LibraryError, LibraryHandle, LibraryLoader};

/// File extension of on-disk library manifests (`<name>.libref.json`).
pub const MANIFEST_EXTENSION: &str = "libref.json";

/// Dependency metadata describing one library on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryManifest {
    /// Fully-qualified identity of the library.
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Loads libraries from `<search path>/<simple name>.libref.json` manifests.
///
/// Search paths are tried in order; the first manifest found wins.
#[derive(Debug, Clone, Default)]
pub struct ManifestLibraryLoader {
    search_paths: Vec<PathBuf>,
}

impl ManifestLibraryLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn manifest_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{MANIFEST_EXTENSION}", crate::simple_name(name)))
    }

    fn read_manifest(path: &Path) -> Result<LibraryManifest, LibraryError> {
        let bytes = std::fs::read(path).map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|err| LibraryError::Manifest {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

impl LibraryLoader for ManifestLibraryLoader {
    fn load(&self, name: &str) -> Result<LibraryHandle, LibraryError> {
        for dir in &self.search_paths {
            let path = Self::manifest_path(dir, name);
            if !path.is_file() {
                continue;
            }
            let manifest = Self::read_manifest(&path)?;
            return Ok(LibraryHandle::new(
                manifest.name,
                path,
                manifest.dependencies,
            ));
        }
        Err(LibraryError::NotFound {
            name: name.to_string(),
        })
    }
}
