use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use lumen_refs::{LibraryError, LibraryHandle, LibraryLoader};

/// In-memory library table. Library `N` lives at `/libs/N.dll`.
#[derive(Debug, Default)]
pub struct StaticLibraryLoader {
    libraries: HashMap<String, Vec<String>>,
    loads: AtomicUsize,
}

impl StaticLibraryLoader {
    pub fn new(table: &[(&str, &[&str])]) -> Self {
        Self {
            libraries: table
                .iter()
                .map(|(name, deps)| {
                    (
                        name.to_string(),
                        deps.iter().map(|dep| dep.to_string()).collect(),
                    )
                })
                .collect(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn location(name: &str) -> PathBuf {
        PathBuf::from(format!("/libs/{name}.dll"))
    }

    /// Number of `load` calls so far, successful or not.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl LibraryLoader for StaticLibraryLoader {
    fn load(&self, name: &str) -> Result<LibraryHandle, LibraryError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let deps = self
            .libraries
            .get(name)
            .ok_or_else(|| LibraryError::NotFound {
                name: name.to_string(),
            })?;
        Ok(LibraryHandle::new(name, Self::location(name), deps.clone()))
    }
}
