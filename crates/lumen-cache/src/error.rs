use std::path::PathBuf;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Why an artifact could not be read from or written to the cache folder.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("artifact read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact envelope is malformed: {0}")]
    Envelope(#[from] bincode::Error),

    #[error("could not write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact schema v{found} is not readable by this build (expects v{expected})")]
    IncompatibleSchemaVersion { expected: u32, found: u32 },

    #[error("artifact {path} exceeds the {limit} byte limit")]
    Oversized { path: PathBuf, limit: usize },
}
