use std::fs;
use std::path::{Path, PathBuf};

use filetime::{set_file_mtime, FileTime};

/// Write `(relative path, contents)` pairs under `root`, creating directories as needed.
///
/// Returns the absolute paths in input order.
pub fn write_files(root: &Path, files: &[(&str, &str)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(rel, text)| {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create fixture directory");
            }
            fs::write(&path, text).expect("write fixture file");
            path
        })
        .collect()
}

/// Pin the last-write time of `path` to `secs` seconds after the Unix epoch.
pub fn set_mtime(path: &Path, secs: i64) {
    set_file_mtime(path, FileTime::from_unix_time(secs, 0)).expect("set fixture mtime");
}
