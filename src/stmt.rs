//! Statement location for Go source files.
//!
//! The coverage profile only says "this block holds N statements"; to
//! decide how many of a block's statements a diff actually touched we need
//! to know which lines a statement *begins* on. Tree-sitter gives us that
//! from the source text alone.

use std::collections::{HashMap, HashSet};

use tree_sitter::{Node, Parser};

use crate::error::{CovDeltaError, Result};
use crate::paths;

/// Compute the set of line numbers (1-indexed) on which a statement
/// syntactically begins.
///
/// Only the construct's own line is marked: an `if` marks the line bearing
/// the keyword, and the statements in its body are marked independently
/// when visited. A file that fails to parse is a reportable error; callers
/// degrade to the proportional estimate instead of aborting the run.
pub fn statement_lines(source: &str) -> Result<HashSet<u32>> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| CovDeltaError::GoParse(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CovDeltaError::GoParse("parser produced no tree".to_string()))?;

    if tree.root_node().has_error() {
        return Err(CovDeltaError::GoParse(
            "source contains syntax errors".to_string(),
        ));
    }

    let mut lines = HashSet::new();
    collect(tree.root_node(), &mut lines);
    Ok(lines)
}

fn collect(node: Node, lines: &mut HashSet<u32>) {
    if is_statement_kind(node.kind()) {
        lines.insert(node.start_position().row as u32 + 1);
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, lines);
    }
}

/// Node kinds that begin an executable statement: assignments and short
/// var declarations, bare expression statements, return, the introductory
/// lines of if/for/switch/select, case labels, channel sends, inc/dec,
/// go/defer launches, branch statements, labels, and declarations.
///
/// `var_declaration`/`const_declaration` also match at package level;
/// coverage blocks never span top-level declarations, so the extra marks
/// can't intersect a block range.
fn is_statement_kind(kind: &str) -> bool {
    matches!(
        kind,
        "short_var_declaration"
            | "assignment_statement"
            | "expression_statement"
            | "return_statement"
            | "if_statement"
            | "for_statement"
            | "expression_switch_statement"
            | "type_switch_statement"
            | "select_statement"
            | "expression_case"
            | "type_case"
            | "communication_case"
            | "default_case"
            | "send_statement"
            | "inc_statement"
            | "dec_statement"
            | "go_statement"
            | "defer_statement"
            | "break_statement"
            | "continue_statement"
            | "goto_statement"
            | "fallthrough_statement"
            | "labeled_statement"
            | "var_declaration"
            | "const_declaration"
    )
}

/// Lazily built per-file statement indexes, scoped to one report
/// computation.
///
/// Owned by the delta calculator rather than living in any process-global
/// state; the populate-on-first-read access is not synchronized, so a
/// cache must not be shared across concurrent computations.
#[derive(Debug, Default)]
pub struct StatementCache {
    files: HashMap<String, Option<HashSet<u32>>>,
}

impl StatementCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The statement-start lines for a profile file name, locating the
    /// source on disk via the candidate path list. `None` when the file
    /// can't be found or parsed under any candidate; failures are cached
    /// so each file is attempted once per run.
    pub fn get(&mut self, file_name: &str) -> Option<&HashSet<u32>> {
        if !self.files.contains_key(file_name) {
            let index = build_index(file_name);
            if index.is_none() {
                eprintln!(
                    "Warning: no statement index for {file_name}; \
                     falling back to proportional estimates"
                );
            }
            self.files.insert(file_name.to_string(), index);
        }

        self.files.get(file_name).and_then(|v| v.as_ref())
    }
}

fn build_index(file_name: &str) -> Option<HashSet<u32>> {
    for path in paths::candidate_paths(file_name) {
        let Ok(source) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(lines) = statement_lines(&source) {
            return Some(lines);
        }
    }
    None
}
