//! Reconciling file names across the three data sources.
//!
//! Coverage profiles key files by import path
//! (`github.com/user/repo/pkg/file.go`), diffs by repo-relative path
//! (`pkg/file.go`), and the working tree by whatever directory the tool
//! happens to run from. Nothing here is guaranteed to resolve; callers
//! treat a miss as "no information for this file".

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Find the entry best matching `name` in a map keyed by file names from
/// another data source. Tried in order:
///
/// 1. exact key equality,
/// 2. a stored key that is a suffix of `name` (the query carries an
///    import-path prefix the map does not),
/// 3. the symmetric case, `name` being a suffix of a stored key.
///
/// The first match wins. Map iteration order is unspecified, so when
/// several keys are suffixes of each other any of them may be returned;
/// all such ties are equally acceptable matches.
pub fn resolve<'a, V>(files: &'a HashMap<String, V>, name: &str) -> Option<&'a V> {
    if let Some(value) = files.get(name) {
        return Some(value);
    }

    for (key, value) in files {
        if name.ends_with(key.as_str()) {
            return Some(value);
        }
    }

    for (key, value) in files {
        if key.ends_with(name) {
            return Some(value);
        }
    }

    None
}

/// Ordered candidate locations for a profile file name on disk.
///
/// Coverage profiles use full import paths while the checkout typically
/// sits at the repository root, so leading path segments are stripped one
/// at a time ("user/repo/pkg/f.go", "repo/pkg/f.go", "pkg/f.go", ...).
/// A `testdata/`-relative sibling is tried last. Best effort only: all
/// candidates failing means the source is unavailable, never an error.
#[must_use]
pub fn candidate_paths(file_name: &str) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(file_name)];

    let parts: Vec<&str> = file_name.split('/').collect();
    for i in 1..parts.len() {
        paths.push(parts[i..].iter().collect());
    }

    paths.push(Path::new("testdata").join(file_name));
    paths
}
