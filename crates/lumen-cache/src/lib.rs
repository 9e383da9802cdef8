//! On-disk artifact cache.
//!
//! Artifacts live at `{cache_dir}/{sanitized name}.bin`. Whether an artifact can be reused is
//! decided purely from last-write timestamps: it is fresh when it exists and is at least as new
//! as every tracked input. This is cheap and errs on the side of rebuilding (a touched but
//! unchanged file, or clock skew, forces a rebuild; it never hides a real edit).
//!
//! Timestamps cannot see a file that disappeared, so every artifact also records the set of
//! inputs it was built from; see [`AssemblyArtifact::built_from`].

mod error;
mod util;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lumen_compiler::Declaration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use error::{CacheError, Result};
pub use util::{atomic_write, PAYLOAD_LIMIT_BYTES};

/// Bump when the on-disk envelope layout changes.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 2;

/// File extension used for artifact files.
pub const ARTIFACT_EXTENSION: &str = "bin";

/// Identity of an artifact: the SHA-256 of its binary image, as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn of_image(image: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The durable output of a successful compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyArtifact {
    id: ArtifactId,
    path: PathBuf,
    image: Vec<u8>,
    declarations: Vec<Declaration>,
    ir: Option<Vec<u8>>,
    /// Sorted, deduplicated paths the artifact was built from.
    inputs: Vec<PathBuf>,
}

impl AssemblyArtifact {
    /// `declarations` should already be restricted to declarations from real source files.
    pub fn new(
        path: impl Into<PathBuf>,
        image: Vec<u8>,
        declarations: Vec<Declaration>,
        ir: Option<Vec<u8>>,
    ) -> Self {
        Self {
            id: ArtifactId::of_image(&image),
            path: path.into(),
            image,
            declarations,
            ir,
            inputs: Vec::new(),
        }
    }

    /// Record the files this artifact was built from.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.inputs = inputs
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self
    }

    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    /// Where the artifact was (or would have been) written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn ir(&self) -> Option<&[u8]> {
        self.ir.as_deref()
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Whether `inputs`, in any order, is exactly the input set recorded at build time.
    pub fn built_from(&self, inputs: &[PathBuf]) -> bool {
        let expected: BTreeSet<&PathBuf> = inputs.iter().collect();
        expected.len() == self.inputs.len()
            && self.inputs.iter().all(|path| expected.contains(path))
    }
}

#[derive(Serialize, Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    schema_version: u32,
    declarations: Vec<Declaration>,
    image: Vec<u8>,
    ir: Option<Vec<u8>>,
    inputs: Vec<PathBuf>,
}

/// Freshness checks plus load/store of artifacts under one cache directory.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact path for a logical `name`, sanitized for the filesystem.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{ARTIFACT_EXTENSION}",
            lumen_core::sanitize_file_stem(name)
        ))
    }

    /// Artifact path keyed by a project descriptor path.
    pub fn artifact_path_for(&self, descriptor: &Path) -> PathBuf {
        self.dir.join(format!(
            "{}.{ARTIFACT_EXTENSION}",
            lumen_core::cache_file_stem(descriptor)
        ))
    }

    /// `true` iff `artifact` exists and its last-write time is at least that of every input.
    ///
    /// A missing input, or any metadata error, means "not fresh".
    pub fn is_fresh(&self, artifact: &Path, inputs: &[PathBuf]) -> bool {
        let artifact_mtime = match lumen_core::modified_time(artifact) {
            Ok(Some(mtime)) => mtime,
            Ok(None) => {
                tracing::debug!(
                    target = "lumen.cache",
                    path = %artifact.display(),
                    "cache miss: artifact does not exist"
                );
                return false;
            }
            Err(err) => {
                tracing::debug!(
                    target = "lumen.cache",
                    path = %artifact.display(),
                    error = %err,
                    "cache miss: failed to stat artifact"
                );
                return false;
            }
        };

        for input in inputs {
            match lumen_core::modified_time(input) {
                Ok(Some(mtime)) if mtime <= artifact_mtime => {}
                Ok(Some(_)) => {
                    tracing::debug!(
                        target = "lumen.cache",
                        path = %artifact.display(),
                        input = %input.display(),
                        "cache miss: input is newer than artifact"
                    );
                    return false;
                }
                Ok(None) => {
                    tracing::debug!(
                        target = "lumen.cache",
                        path = %artifact.display(),
                        input = %input.display(),
                        "cache miss: input is missing"
                    );
                    return false;
                }
                Err(err) => {
                    tracing::debug!(
                        target = "lumen.cache",
                        input = %input.display(),
                        error = %err,
                        "cache miss: failed to stat input"
                    );
                    return false;
                }
            }
        }

        tracing::debug!(
            target = "lumen.cache",
            path = %artifact.display(),
            inputs = inputs.len(),
            "cache hit"
        );
        true
    }

    /// Load the artifact at `path`. Returns `Ok(None)` when no file exists.
    pub fn load(&self, path: &Path) -> Result<Option<AssemblyArtifact>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        if meta.len() > PAYLOAD_LIMIT_BYTES as u64 {
            return Err(CacheError::Oversized {
                path: path.to_path_buf(),
                limit: PAYLOAD_LIMIT_BYTES,
            });
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let header: SchemaHeader = util::decode_prefix(&bytes)?;
        if header.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(CacheError::IncompatibleSchemaVersion {
                expected: ARTIFACT_SCHEMA_VERSION,
                found: header.schema_version,
            });
        }
        let envelope: ArtifactEnvelope = util::decode(&bytes)?;

        tracing::debug!(
            target = "lumen.cache",
            path = %path.display(),
            bytes = bytes.len(),
            "loaded artifact"
        );
        Ok(Some(
            AssemblyArtifact::new(path, envelope.image, envelope.declarations, envelope.ir)
                .with_inputs(envelope.inputs),
        ))
    }

    /// Persist `artifact` at its own path, replacing whatever was there.
    ///
    /// The previous file is removed first so a failed write never leaves a stale artifact that
    /// still looks fresh.
    pub fn store(&self, artifact: &AssemblyArtifact) -> Result<()> {
        let path = artifact.path();
        util::remove_file_best_effort(path, "store.replace_stale");

        let bytes = util::encode(&ArtifactEnvelope {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            declarations: artifact.declarations.clone(),
            image: artifact.image.clone(),
            ir: artifact.ir.clone(),
            inputs: artifact.inputs.clone(),
        })?;

        if let Err(err) = atomic_write(path, &bytes) {
            tracing::warn!(
                target = "lumen.cache",
                path = %path.display(),
                error = %err,
                "failed to persist artifact"
            );
            return Err(err);
        }

        tracing::debug!(
            target = "lumen.cache",
            path = %path.display(),
            id = %artifact.id,
            bytes = bytes.len(),
            "stored artifact"
        );
        Ok(())
    }

    /// Remove the artifact at `path`, if any.
    pub fn invalidate(&self, path: &Path) -> bool {
        util::remove_file_best_effort(path, "invalidate")
    }
}
