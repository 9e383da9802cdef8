use std::path::Path;

use sha2::{Digest, Sha256};

/// Longest stem we will produce before truncating and appending a hash suffix.
const MAX_STEM_LEN: usize = 96;

/// Hex characters of the SHA-256 prefix appended to disambiguate stems.
const DIGEST_LEN: usize = 16;

/// Turn an arbitrary label into a string that is safe to use as a file name stem on every
/// platform we support.
///
/// ASCII alphanumerics, `-` and `.` are kept; every other character (path separators, drive
/// colons, whitespace, non-ASCII) becomes `_`. Runs of `_` are collapsed and leading/trailing
/// `_`/`.` are trimmed. Overlong stems are truncated and suffixed with a hash of the full input
/// so distinct inputs keep distinct names.
#[must_use]
pub fn sanitize_file_stem(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
            ch
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    let mut stem = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };

    if stem.len() > MAX_STEM_LEN {
        with_digest(&mut stem, label);
    }

    stem
}

/// Stable cache name for an artifact built from the project described by `descriptor`.
///
/// Sanitizing alone is lossy (`a/b` and `a_b` read the same), so the stem always ends with a
/// digest of the full path.
#[must_use]
pub fn cache_file_stem(descriptor: &Path) -> String {
    let label = descriptor.to_string_lossy();
    let mut stem = sanitize_file_stem(&label);
    with_digest(&mut stem, &label);
    stem
}

fn with_digest(stem: &mut String, label: &str) {
    let digest = Sha256::digest(label.as_bytes());
    // `stem` is pure ASCII, so byte truncation is char-aligned.
    stem.truncate(MAX_STEM_LEN - DIGEST_LEN - 1);
    stem.push('-');
    stem.push_str(&hex::encode(&digest[..DIGEST_LEN / 2]));
}
