//! Command handler for the covdelta CLI.
//!
//! The handler returns its output as a `String` plus the threshold
//! outcome, making it easy to test without capturing stdout.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;

use crate::changeset::{self, ChangeSet};
use crate::profile::Coverage;
use crate::report::Report;

/// Output style for the rendered report.
#[derive(Clone, ValueEnum)]
pub enum Style {
    Markdown,
    Json,
}

/// Inputs for one report computation, as resolved from the command line.
pub struct ReportArgs<'a> {
    pub old_coverage: &'a Path,
    pub new_coverage: &'a Path,
    pub changed_files: &'a Path,
    /// Import path prefix used to qualify the changed-file paths so they
    /// match the coverage profile keys.
    pub root: &'a str,
    /// Path prefix to strip from all names before rendering.
    pub trim: Option<&'a str>,
    /// Structured change-set JSON file.
    pub changeset: Option<&'a Path>,
    /// Unified diff file; ignored when `changeset` is given.
    pub diff: Option<&'a Path>,
    /// Minimum coverage percentage for new code (0 disables the check).
    pub min_coverage: f64,
}

/// Compute and render the coverage delta report.
///
/// Returns the rendered output and whether the new-code coverage fell
/// below the configured minimum. The threshold outcome is separate from
/// the text on purpose: the report is always complete, and the caller
/// turns the boolean into a process exit code.
pub fn cmd_report(args: &ReportArgs, style: &Style) -> Result<(String, bool)> {
    let old = Coverage::load(args.old_coverage).with_context(|| {
        format!(
            "Failed to parse old coverage profile {}",
            args.old_coverage.display()
        )
    })?;
    let new = Coverage::load(args.new_coverage).with_context(|| {
        format!(
            "Failed to parse new coverage profile {}",
            args.new_coverage.display()
        )
    })?;

    let changed_files = changeset::parse_changed_files(args.changed_files, args.root)
        .with_context(|| {
            format!(
                "Failed to read changed files list {}",
                args.changed_files.display()
            )
        })?;

    let change_set = match (args.changeset, args.diff) {
        (Some(path), _) => Some(
            ChangeSet::load_json(path)
                .with_context(|| format!("Failed to parse change-set {}", path.display()))?,
        ),
        (None, Some(path)) => Some(
            ChangeSet::load_unified_diff(path)
                .with_context(|| format!("Failed to read diff {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let mut report = Report::new(old, new, changed_files, change_set);
    report.min_coverage = args.min_coverage;

    if let Some(prefix) = args.trim {
        report.trim_prefix(prefix);
    }

    let failed = report.fails_threshold();
    let output = match style {
        Style::Markdown => report.markdown(),
        Style::Json => report.json()?,
    };

    Ok((output, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Write the three mandatory input files into a temp dir.
    fn setup_inputs(old: &str, new: &str, changed: &str) -> (tempfile::TempDir, [PathBuf; 3]) {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("old.txt");
        let new_path = dir.path().join("new.txt");
        let changed_path = dir.path().join("changed.json");
        std::fs::write(&old_path, old).unwrap();
        std::fs::write(&new_path, new).unwrap();
        std::fs::write(&changed_path, changed).unwrap();
        (dir, [old_path, new_path, changed_path])
    }

    fn args<'a>(paths: &'a [PathBuf; 3], root: &'a str) -> ReportArgs<'a> {
        ReportArgs {
            old_coverage: &paths[0],
            new_coverage: &paths[1],
            changed_files: &paths[2],
            root,
            trim: None,
            changeset: None,
            diff: None,
            min_coverage: 0.0,
        }
    }

    #[test]
    fn test_cmd_report_markdown() {
        let (_dir, paths) = setup_inputs(
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\n",
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\nexample.com/mod/a.go:5.1,8.2 4 0\n",
            r#"["a.go"]"#,
        );

        let (out, failed) = cmd_report(&args(&paths, "example.com/mod"), &Style::Markdown).unwrap();

        assert!(out.starts_with("### Coverage Report - 50.00%"));
        assert!(out.contains("**decrease**"));
        assert!(out.contains("example.com/mod/a.go"));
        assert!(!failed);
    }

    #[test]
    fn test_cmd_report_json() {
        let (_dir, paths) = setup_inputs(
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\n",
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\n",
            r#"["a.go"]"#,
        );

        let (out, failed) = cmd_report(&args(&paths, "example.com/mod"), &Style::Json).unwrap();

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["changed_files"][0], "example.com/mod/a.go");
        assert!(!failed);
    }

    #[test]
    fn test_cmd_report_threshold_failure() {
        let (_dir, paths) = setup_inputs(
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\n",
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\nexample.com/mod/a.go:5.1,8.2 4 0\n",
            r#"["a.go"]"#,
        );

        let mut report_args = args(&paths, "example.com/mod");
        report_args.min_coverage = 80.0;

        let (out, failed) = cmd_report(&report_args, &Style::Markdown).unwrap();

        // The report still renders in full; failure only shows up in the
        // boolean and the warning block.
        assert!(failed);
        assert!(out.contains("> [!WARNING]"));
        assert!(out.contains("Coverage threshold not met"));
    }

    #[test]
    fn test_cmd_report_with_diff_file() {
        let (dir, paths) = setup_inputs(
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\n",
            "mode: count\nexample.com/mod/a.go:1.1,4.2 4 1\nexample.com/mod/a.go:10.1,13.2 4 1\n",
            r#"["a.go"]"#,
        );

        let diff_path = dir.path().join("changes.diff");
        std::fs::write(
            &diff_path,
            "+++ b/a.go\n@@ -9,0 +10,4 @@\n+one\n+two\n+three\n+four\n",
        )
        .unwrap();

        let mut report_args = args(&paths, "example.com/mod");
        report_args.diff = Some(&diff_path);

        let (out, _) = cmd_report(&report_args, &Style::Markdown).unwrap();

        // All 4 lines of the 4-statement block changed.
        assert!(out.contains("| **New Code** | N/A | 100.00% | 4/4 statements |"));
    }

    #[test]
    fn test_cmd_report_missing_input_is_fatal() {
        let (_dir, paths) = setup_inputs("mode: count\n", "mode: count\n", r#"[]"#);

        let mut report_args = args(&paths, "");
        let missing = PathBuf::from("/no/such/file.json");
        report_args.changeset = Some(&missing);

        assert!(cmd_report(&report_args, &Style::Markdown).is_err());
    }
}
