//! Which source lines a pull request added or modified, per file.
//!
//! Built from either a structured JSON mapping or a textual unified diff
//! (`git diff` output). The engine treats added and modified lines
//! identically: both are "changed".

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths;

/// Lines changed in a single file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileChange {
    #[serde(rename = "added_lines", default)]
    pub added: BTreeSet<u32>,
    #[serde(rename = "modified_lines", default)]
    pub modified: BTreeSet<u32>,
}

impl FileChange {
    /// Whether the line was added or modified.
    #[must_use]
    pub fn is_changed(&self, line: u32) -> bool {
        self.added.contains(&line) || self.modified.contains(&line)
    }

    /// A present-but-empty entry: the diff covered this file and found
    /// zero changed lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty()
    }

    /// Number of changed lines within `[start, end]` inclusive.
    #[must_use]
    pub fn changed_in_range(&self, start: u32, end: u32) -> u32 {
        (start..=end).filter(|l| self.is_changed(*l)).count() as u32
    }

    /// Whether any line in `[start, end]` inclusive changed.
    #[must_use]
    pub fn any_in_range(&self, start: u32, end: u32) -> bool {
        (start..=end).any(|l| self.is_changed(l))
    }
}

/// Changed lines for all files touched by a change.
///
/// Callers hold an `Option<ChangeSet>`: `None` means no line-level
/// information is available at all, which is a distinct state from a
/// present map with no entry (or an empty entry) for some file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    pub files: HashMap<String, FileChange>,
}

impl ChangeSet {
    /// Deserialize the structured format:
    /// `{ "<path>": { "added_lines": [..], "modified_lines": [..] } }`
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Read and parse a structured change-set file. A malformed file is a
    /// fatal error; the whole run is aborted rather than reporting against
    /// a partial change-set.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Read and parse a unified diff file.
    pub fn load_unified_diff(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_unified_diff(&content))
    }

    /// Parse a unified diff (`git diff` output).
    ///
    /// `+++ b/<path>` headers start a new file (the `b/` prefix is
    /// stripped; `/dev/null` means the file was deleted). `@@` hunk
    /// headers reset the running new-file line counter. `+` lines mark
    /// the counter as added and advance it, context lines advance it,
    /// and `-` lines refer only to the old file and do not advance it.
    ///
    /// Malformed hunk headers are skipped without aborting: the diff
    /// comes from a trusted tool, so partial recovery with a stale
    /// counter beats losing the whole report.
    #[must_use]
    pub fn from_unified_diff(diff_text: &str) -> Self {
        let mut files: HashMap<String, FileChange> = HashMap::new();
        let mut current_file: Option<String> = None;
        let mut new_line_number: u32 = 0;

        for line in diff_text.lines() {
            if let Some(rest) = line.strip_prefix("+++ ") {
                if rest == "/dev/null" {
                    current_file = None; // File was deleted
                } else {
                    // Strip common VCS prefixes: "b/" (default git), "a/"
                    // (some tools). --no-prefix diffs carry none.
                    let path = rest
                        .strip_prefix("b/")
                        .or_else(|| rest.strip_prefix("a/"))
                        .unwrap_or(rest);
                    // Register the entry immediately so a file whose hunks
                    // add nothing still shows up as present-but-empty.
                    files.entry(path.to_string()).or_default();
                    current_file = Some(path.to_string());
                }
            } else if line.starts_with("@@") {
                if let Some(start) = parse_hunk_header(line) {
                    new_line_number = start;
                }
            } else if let Some(ref file) = current_file {
                if line.starts_with('\\') {
                    // "\ No newline at end of file" is diff metadata, not a real line
                } else if line.starts_with('+') && !line.starts_with("+++") {
                    files
                        .entry(file.clone())
                        .or_default()
                        .added
                        .insert(new_line_number);
                    new_line_number += 1;
                } else if line.starts_with('-') && !line.starts_with("---") {
                    // Deleted lines don't advance the new-file counter
                } else {
                    // Context line or other
                    new_line_number += 1;
                }
            }
        }

        Self { files }
    }

    /// Look up the change entry for a profile file name, reconciling path
    /// representations via suffix matching in both directions.
    #[must_use]
    pub fn find(&self, file_name: &str) -> Option<&FileChange> {
        paths::resolve(&self.files, file_name)
    }

    /// Whether any line in `[start, end]` of the named file changed.
    #[must_use]
    pub fn is_line_in_range(&self, file_name: &str, start: u32, end: u32) -> bool {
        self.find(file_name)
            .is_some_and(|fc| fc.any_in_range(start, end))
    }
}

/// Parse the "new" start line from a hunk header like `@@ -10,5 +20,8 @@`.
fn parse_hunk_header(line: &str) -> Option<u32> {
    let after_at = line.strip_prefix("@@ ")?;
    let parts: Vec<&str> = after_at.split(' ').collect();
    // parts[0] = "-old_start,old_count"
    // parts[1] = "+new_start,new_count" or "+new_start"
    if parts.len() < 2 {
        return None;
    }
    let new_part = parts[1].strip_prefix('+')?;
    let start_str = new_part.split(',').next()?;
    start_str.parse::<u32>().ok()
}

/// Parse the externally supplied changed-files list: a JSON array of
/// repo-relative paths, each qualified with the module's import root so
/// it matches the coverage profile keys.
pub fn parse_changed_files(path: &Path, root: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let files: Vec<String> = serde_json::from_str(&content)?;

    let root = root.trim_end_matches('/');
    Ok(files
        .into_iter()
        .map(|f| {
            if root.is_empty() {
                f
            } else {
                format!("{root}/{f}")
            }
        })
        .collect())
}
