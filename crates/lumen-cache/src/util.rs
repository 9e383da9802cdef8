use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Upper bound for any artifact payload we will decode from disk.
///
/// A corrupted length prefix should surface as a load error, not an enormous allocation.
pub const PAYLOAD_LIMIT_BYTES: usize = 256 * 1024 * 1024;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode_options().serialize(value)?)
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode_options()
        .with_limit(PAYLOAD_LIMIT_BYTES as u64)
        .deserialize(bytes)?)
}

/// Decode a leading value (such as a version header) and ignore whatever follows it.
pub(crate) fn decode_prefix<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode_options()
        .with_limit(PAYLOAD_LIMIT_BYTES as u64)
        .allow_trailing_bytes()
        .deserialize(bytes)?)
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    let Err(err) = fs::remove_file(path) else {
        return true;
    };
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    tracing::debug!(
        target = "lumen.cache",
        path = %path.display(),
        reason,
        error = %err,
        "failed to remove artifact file"
    );
    false
}

/// Write `bytes` to `path` through a sibling temporary file and a rename, so readers never
/// observe a half-written artifact.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    write_then_rename(path, bytes).map_err(|source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_then_rename(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .map(|parent| if parent.as_os_str().is_empty() { Path::new(".") } else { parent })
        .ok_or_else(|| io::Error::other("artifact path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp = temporary_sibling(path)?;
    let written = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| replace(&tmp, path));
    if written.is_err() {
        remove_file_best_effort(&tmp, "atomic_write.cleanup");
    }
    written
}

/// `rename` refuses to overwrite on Windows, so the destination is cleared once and retried.
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(_) if cfg!(windows) && to.exists() => {
            fs::remove_file(to)?;
            fs::rename(from, to)
        }
        other => other,
    }
}

fn temporary_sibling(dest: &Path) -> io::Result<PathBuf> {
    let name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("artifact path has no file name"))?;
    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tmp = name.to_os_string();
    tmp.push(format!(".{}.{counter}.tmp", std::process::id()));
    Ok(dest.with_file_name(tmp))
}
