//! In-memory representation of a Go coverage run, plus the `-coverprofile`
//! text parser that produces it.
//!
//! Reference: https://go.dev/blog/cover
//!
//! Format:
//!   mode: set|count|atomic
//!   <file>:<startLine>.<startCol>,<endLine>.<endCol> <numStatements> <count>
//!
//! Each line describes a basic block (a range of source lines) with the
//! number of statements in the block and how many times it was executed.
//! Blocks are kept as-is rather than expanded to lines: the delta engine
//! needs the block structure to attribute new statements.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{CovDeltaError, Result};

/// Sentinel file key meaning "repository root", used when prefix trimming
/// leaves an empty path.
pub const ROOT_KEY: &str = ".";

/// One instrumented basic block: a contiguous source range with an
/// aggregate statement count and a single execution count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProfileBlock {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub num_stmt: u32,
    pub count: u64,
}

impl ProfileBlock {
    /// Whether the block was executed at all. The magnitude of `count` is
    /// otherwise irrelevant.
    #[must_use]
    pub fn covered(&self) -> bool {
        self.count > 0
    }

    /// Exact positional identity, used by the legacy block-identity
    /// comparison mode.
    #[must_use]
    pub fn range_key(&self) -> (u32, u32, u32, u32) {
        (self.start_line, self.start_col, self.end_line, self.end_col)
    }
}

/// Coverage data for a single source file, blocks in source order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Profile {
    pub file_name: String,
    pub blocks: Vec<ProfileBlock>,
    pub total_stmt: i64,
    pub covered_stmt: i64,
    pub missed_stmt: i64,
}

impl Profile {
    fn recompute_totals(&mut self) {
        self.total_stmt = self.blocks.iter().map(|b| i64::from(b.num_stmt)).sum();
        self.covered_stmt = self
            .blocks
            .iter()
            .filter(|b| b.covered())
            .map(|b| i64::from(b.num_stmt))
            .sum();
        self.missed_stmt = self.total_stmt - self.covered_stmt;
    }

    /// Coverage percentage, 0.0 when the file has no statements.
    #[must_use]
    pub fn percent(&self) -> f64 {
        percent(self.covered_stmt, self.total_stmt)
    }
}

/// Statement totals for an aggregate that is not a single file (a package,
/// or the whole repository).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Totals {
    pub total_stmt: i64,
    pub covered_stmt: i64,
}

impl Totals {
    #[must_use]
    pub fn percent(&self) -> f64 {
        percent(self.covered_stmt, self.total_stmt)
    }
}

/// Compute a coverage percentage, returning 0.0 when the total is zero.
#[must_use]
pub fn percent(covered: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64 * 100.0
    }
}

/// A complete coverage run: one [`Profile`] per source file plus
/// repository-wide totals.
///
/// Invariant: the aggregate totals always equal the sum of the per-file
/// totals. They are recomputed from scratch whenever the file set changes
/// (parsing, prefix trimming) rather than adjusted incrementally.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Coverage {
    pub files: BTreeMap<String, Profile>,
    pub total_stmt: i64,
    pub covered_stmt: i64,
    pub missed_stmt: i64,
}

impl Coverage {
    /// Parse a Go coverage profile from text.
    ///
    /// A line that is neither empty, a `mode:` header, nor a well-formed
    /// block is a fatal error: a truncated or corrupted profile must not
    /// silently produce a partial report.
    pub fn parse(input: &str) -> Result<Self> {
        let mut cov = Coverage::default();

        for (i, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("mode:") {
                continue;
            }

            let (file, block) = parse_block_line(line).ok_or_else(|| CovDeltaError::Profile {
                line: i + 1,
                message: format!("invalid block line: {line:?}"),
            })?;

            cov.files
                .entry(file.to_string())
                .or_insert_with(|| Profile {
                    file_name: file.to_string(),
                    ..Profile::default()
                })
                .blocks
                .push(block);
        }

        for profile in cov.files.values_mut() {
            profile.recompute_totals();
        }
        cov.recompute_totals();

        Ok(cov)
    }

    /// Read and parse a coverage profile file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn recompute_totals(&mut self) {
        self.total_stmt = self.files.values().map(|p| p.total_stmt).sum();
        self.covered_stmt = self.files.values().map(|p| p.covered_stmt).sum();
        self.missed_stmt = self.total_stmt - self.covered_stmt;
    }

    /// Overall coverage percentage, 0.0 when there are no statements.
    #[must_use]
    pub fn percent(&self) -> f64 {
        percent(self.covered_stmt, self.total_stmt)
    }

    /// Aggregate statement totals per package (the directory of each file).
    #[must_use]
    pub fn by_package(&self) -> BTreeMap<String, Totals> {
        let mut packages: BTreeMap<String, Totals> = BTreeMap::new();
        for (name, profile) in &self.files {
            let totals = packages.entry(package_of(name).to_string()).or_default();
            totals.total_stmt += profile.total_stmt;
            totals.covered_stmt += profile.covered_stmt;
        }
        packages
    }

    /// Strip `prefix` (and one following `/`) from every file key.
    ///
    /// This is a destructive, one-time normalization applied before
    /// rendering, not a general-purpose operation: the map keys are
    /// rewritten in place. Totals are recomputed afterwards to uphold the
    /// aggregate invariant, even though trimming cannot change them.
    pub fn trim_prefix(&mut self, prefix: &str) {
        let files = std::mem::take(&mut self.files);
        self.files = files
            .into_iter()
            .map(|(name, mut profile)| {
                let trimmed = trim_file_prefix(&name, prefix);
                profile.file_name = trimmed.clone();
                (trimmed, profile)
            })
            .collect();
        self.recompute_totals();
    }
}

/// The package (directory) portion of a slash-separated file name, or
/// [`ROOT_KEY`] for a bare file name.
#[must_use]
pub fn package_of(file_name: &str) -> &str {
    match file_name.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => ROOT_KEY,
    }
}

/// Strip a path prefix plus one separator, substituting [`ROOT_KEY`] when
/// nothing remains.
#[must_use]
pub fn trim_file_prefix(name: &str, prefix: &str) -> String {
    let trimmed = name.strip_prefix(prefix).unwrap_or(name);
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        ROOT_KEY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a single block line, returning `(file_path, block)`.
///
/// Format: `<file>:<startLine>.<startCol>,<endLine>.<endCol> <numStmt> <count>`
///
/// The split anchors on the last `.go:` so that file paths containing
/// colons parse correctly.
fn parse_block_line(line: &str) -> Option<(&str, ProfileBlock)> {
    let colon_pos = line.rfind(".go:")? + 3; // position of ':'

    let file = &line[..colon_pos];
    let rest = &line[colon_pos + 1..];

    // rest = "startLine.startCol,endLine.endCol numStmt count"
    let (range, tail) = rest.split_once(' ')?;
    let (start, end) = range.split_once(',')?;

    let (start_line, start_col) = start.split_once('.')?;
    let (end_line, end_col) = end.split_once('.')?;

    let mut parts = tail.split_whitespace();
    let num_stmt: u32 = parts.next()?.parse().ok()?;
    let count: u64 = parts.next()?.parse().ok()?;

    Some((
        file,
        ProfileBlock {
            start_line: start_line.parse().ok()?,
            start_col: start_col.parse().ok()?,
            end_line: end_line.parse().ok()?,
            end_col: end_col.parse().ok()?,
            num_stmt,
            count,
        },
    ))
}
