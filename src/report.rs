//! Report assembly and rendering.
//!
//! The Markdown output lands in a public PR comment that tooling may
//! re-fetch and diff, so rendering is byte-deterministic: identical inputs
//! produce identical text, independent of map iteration order.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::changeset::ChangeSet;
use crate::delta::{DeltaCalculator, NewCodeBlock, NewCodeTotals};
use crate::error::Result;
use crate::profile::{package_of, trim_file_prefix, Coverage, Profile};

/// Suffix convention identifying Go unit test files.
const TEST_FILE_SUFFIX: &str = "_test.go";

/// A single comparison of two coverage runs against a changed-file list.
///
/// Constructed once per invocation from already-parsed inputs and
/// read-only afterwards, except for the one-time [`Report::trim_prefix`]
/// normalization applied before rendering.
#[derive(Debug, Serialize)]
pub struct Report {
    pub old: Coverage,
    pub new: Coverage,
    pub changed_files: Vec<String>,
    pub changed_packages: Vec<String>,
    /// Minimum coverage threshold for new code (0 disables the check).
    pub min_coverage: f64,
    /// Line-level change information, when available.
    pub change_set: Option<ChangeSet>,
}

impl Report {
    #[must_use]
    pub fn new(
        old: Coverage,
        new: Coverage,
        mut changed_files: Vec<String>,
        change_set: Option<ChangeSet>,
    ) -> Self {
        changed_files.sort();
        let changed_packages = changed_packages(&changed_files);

        Self {
            old,
            new,
            changed_files,
            changed_packages,
            min_coverage: 0.0,
            change_set,
        }
    }

    fn calculator(&self) -> DeltaCalculator<'_> {
        DeltaCalculator::new(
            &self.old,
            &self.new,
            &self.changed_files,
            self.change_set.as_ref(),
        )
    }

    /// Difference between new and old overall coverage, in percentage
    /// points.
    #[must_use]
    pub fn overall_delta(&self) -> f64 {
        self.new.percent() - self.old.percent()
    }

    /// Whether the new-code coverage falls below the configured minimum.
    /// Reported to the caller as an exit signal, never by altering the
    /// rendered report.
    #[must_use]
    pub fn fails_threshold(&self) -> bool {
        if self.min_coverage <= 0.0 {
            return false;
        }
        let totals = self.calculator().new_code_totals();
        totals.total > 0 && totals.percent() < self.min_coverage
    }

    /// Strip a path prefix from every file and package name, in the
    /// report's own lists and in both coverage runs. Destructive and
    /// intended to run exactly once, before rendering.
    pub fn trim_prefix(&mut self, prefix: &str) {
        for name in &mut self.changed_packages {
            *name = trim_file_prefix(name, prefix);
        }
        for name in &mut self.changed_files {
            *name = trim_file_prefix(name, prefix);
        }

        self.old.trim_prefix(prefix);
        self.new.trim_prefix(prefix);
    }

    #[must_use]
    pub fn title(&self) -> String {
        let delta = self.overall_delta();
        let new_cov = format!("{:.2}%", self.new.percent());
        let (_, delta_str) = emoji_score(self.new.percent(), self.old.percent());

        if delta == 0.0 {
            format!("### Coverage Report - {new_cov} (no change)")
        } else if delta > 0.0 {
            format!("### Coverage Report - {new_cov} ({delta_str}) - **increase**")
        } else {
            format!("### Coverage Report - {new_cov} ({delta_str}) - **decrease**")
        }
    }

    /// Render the full Markdown report.
    #[must_use]
    pub fn markdown(&self) -> String {
        let mut calc = self.calculator();
        let new_code = calc.new_code_totals();

        let mut out = String::new();
        writeln!(out, "{}", self.title()).unwrap();
        self.write_overall_summary(&mut out, new_code);
        self.write_package_details(&mut out);
        self.write_file_details(&mut out);
        if new_code.total > 0 {
            self.write_new_code_details(&mut out, calc.new_code_blocks());
        }

        out
    }

    /// Fully field-complete JSON serialization for programmatic consumers.
    pub fn json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn write_overall_summary(&self, out: &mut String, new_code: NewCodeTotals) {
        let old_percent = self.old.percent();
        let new_percent = self.new.percent();
        let (emoji, delta_str) = emoji_score(new_percent, old_percent);

        out.push('\n');
        out.push_str("#### Overall Coverage Summary\n");
        out.push('\n');
        out.push_str("| Metric | Old Coverage | New Coverage | Change | :robot: |\n");
        out.push_str("|--------|-------------|-------------|--------|---------|\n");
        writeln!(
            out,
            "| **Total** | {old_percent:.2}% | {new_percent:.2}% | {delta_str} | {emoji} |"
        )
        .unwrap();

        if new_code.total > 0 {
            let pr_percent = new_code.percent();
            let pr_emoji = new_code_emoji(pr_percent);
            writeln!(
                out,
                "| **New Code** | N/A | {pr_percent:.2}% | {}/{} statements | {pr_emoji} |",
                new_code.covered, new_code.total
            )
            .unwrap();
        }

        out.push('\n');

        // The CI step turns this warning into a failing exit code.
        if self.min_coverage > 0.0 && new_code.total > 0 {
            let pr_percent = new_code.percent();
            if pr_percent < self.min_coverage {
                out.push_str("> [!WARNING]\n");
                writeln!(
                    out,
                    "> **Coverage threshold not met:** New code coverage is \
                     **{pr_percent:.2}%**, which is below the required threshold of \
                     **{:.2}%**.",
                    self.min_coverage
                )
                .unwrap();
                out.push('\n');
            }
        }

        let stmt_change = signed_change(self.new.total_stmt - self.old.total_stmt);
        let covered_change = signed_change(self.new.covered_stmt - self.old.covered_stmt);

        out.push_str("| **Statements** | Total | Covered | Missed |\n");
        out.push_str("|---|---|---|---|\n");
        writeln!(
            out,
            "| **Old** | {} | {} | {} |",
            self.old.total_stmt, self.old.covered_stmt, self.old.missed_stmt
        )
        .unwrap();
        writeln!(
            out,
            "| **New** | {}{stmt_change} | {}{covered_change} | {} |",
            self.new.total_stmt, self.new.covered_stmt, self.new.missed_stmt
        )
        .unwrap();
        out.push('\n');
    }

    fn write_package_details(&self, out: &mut String) {
        out.push_str("---\n");
        out.push('\n');
        out.push_str("<details>\n");
        out.push('\n');
        out.push_str("<summary>Impacted Packages</summary>\n");
        out.push('\n');
        out.push_str("| Impacted Packages | Coverage Δ | :robot: |\n");
        out.push_str("|-------------------|------------|---------|\n");

        let old_packages = self.old.by_package();
        let new_packages = self.new.by_package();

        for pkg in &self.changed_packages {
            let old_percent = old_packages.get(pkg).map_or(0.0, |t| t.percent());
            let new_percent = new_packages.get(pkg).map_or(0.0, |t| t.percent());

            let (emoji, delta_str) = emoji_score(new_percent, old_percent);
            writeln!(out, "| {pkg} | {new_percent:.2}% ({delta_str}) | {emoji} |").unwrap();
        }

        out.push('\n');
        out.push_str("</details>\n");
        out.push('\n');
    }

    fn write_file_details(&self, out: &mut String) {
        out.push_str("<details>\n");
        out.push('\n');
        out.push_str("<summary>Coverage by file</summary>\n");
        out.push('\n');

        let (code_files, test_files): (Vec<&String>, Vec<&String>) = self
            .changed_files
            .iter()
            .partition(|f| !f.ends_with(TEST_FILE_SUFFIX));

        if !code_files.is_empty() {
            self.write_code_file_details(out, &code_files);
        }
        if !test_files.is_empty() {
            write_test_file_details(out, &test_files);
        }

        out.push_str("</details>");
    }

    fn write_code_file_details(&self, out: &mut String, files: &[&String]) {
        out.push_str("### Changed files (no unit tests)\n");
        out.push('\n');
        out.push_str("| Changed File | Coverage Δ | Total | Covered | Missed | :robot: |\n");
        out.push_str("|--------------|------------|-------|---------|--------|---------|\n");

        for name in files {
            let old_profile = self.old.files.get(*name);
            let new_profile = self.new.files.get(*name);

            let old_percent = old_profile.map_or(0.0, Profile::percent);
            let new_percent = new_profile.map_or(0.0, Profile::percent);

            let (emoji, delta_str) = emoji_score(new_percent, old_percent);
            writeln!(
                out,
                "| {name} | {new_percent:.2}% ({delta_str}) | {} | {} | {} | {emoji} |",
                value_with_delta(
                    old_profile.map_or(0, |p| p.total_stmt),
                    new_profile.map_or(0, |p| p.total_stmt)
                ),
                value_with_delta(
                    old_profile.map_or(0, |p| p.covered_stmt),
                    new_profile.map_or(0, |p| p.covered_stmt)
                ),
                value_with_delta(
                    old_profile.map_or(0, |p| p.missed_stmt),
                    new_profile.map_or(0, |p| p.missed_stmt)
                ),
            )
            .unwrap();
        }

        out.push('\n');
        out.push_str(
            "_Please note that the \"Total\", \"Covered\", and \"Missed\" counts \
             above refer to ***code statements*** instead of lines of code. The value in brackets \
             refers to the test coverage of that file in the old version of the code._\n",
        );
        out.push('\n');
    }

    fn write_new_code_details(&self, out: &mut String, blocks: Vec<NewCodeBlock>) {
        if blocks.is_empty() {
            return;
        }

        // Group by file; BTreeMap keeps the per-file sections sorted.
        let mut by_file: BTreeMap<&str, Vec<&NewCodeBlock>> = BTreeMap::new();
        for block in &blocks {
            by_file.entry(&block.file_name).or_default().push(block);
        }

        out.push_str("<details>\n");
        out.push('\n');
        out.push_str("<summary>New Code Coverage Details</summary>\n");
        out.push('\n');
        out.push_str(
            "This section shows the coverage status of each new code block added in this PR.\n",
        );
        out.push('\n');

        for (file_name, file_blocks) in &by_file {
            writeln!(out, "#### {file_name}").unwrap();
            out.push('\n');
            out.push_str("```diff\n");

            for block in file_blocks {
                if block.lines.is_empty() {
                    write_block_summary(out, block);
                } else {
                    let prefix = if block.covered { '+' } else { '-' };
                    for line in &block.lines {
                        writeln!(out, "{prefix} {line}").unwrap();
                    }
                }
            }

            out.push_str("```\n");
            out.push('\n');
        }

        out.push_str("</details>\n");
        out.push('\n');
    }
}

fn changed_packages(changed_files: &[String]) -> Vec<String> {
    let mut packages: Vec<String> = changed_files
        .iter()
        .map(|f| package_of(f).to_string())
        .collect();
    packages.sort();
    packages.dedup();
    packages
}

/// Textual fallback for a new-code block whose source lines are not
/// available on disk.
fn write_block_summary(out: &mut String, block: &NewCodeBlock) {
    let line_range = if block.start_line == block.end_line {
        format!("Line {}", block.start_line)
    } else {
        format!("Lines {}-{}", block.start_line, block.end_line)
    };

    let stmt_text = if block.num_stmt == 1 {
        "statement"
    } else {
        "statements"
    };

    if block.covered {
        writeln!(
            out,
            "+ {line_range} ({} {stmt_text}) - COVERED ✓",
            block.num_stmt
        )
        .unwrap();
    } else {
        writeln!(
            out,
            "- {line_range} ({} {stmt_text}) - NOT COVERED ✗",
            block.num_stmt
        )
        .unwrap();
    }
}

fn write_test_file_details(out: &mut String, files: &[&String]) {
    out.push_str("### Changed unit test files\n");
    out.push('\n');

    for name in files {
        writeln!(out, "- {name}").unwrap();
    }

    out.push('\n');
}

/// `42 (-8)` style cell: the new value with the signed difference from the
/// old value in brackets, omitted when unchanged.
fn value_with_delta(old_val: i64, new_val: i64) -> String {
    let diff = old_val - new_val;
    if diff < 0 {
        format!("{new_val} (+{})", -diff)
    } else if diff > 0 {
        format!("{new_val} (-{diff})")
    } else {
        format!("{new_val}")
    }
}

/// ` (+2)` style suffix for the statements table, empty when unchanged.
fn signed_change(diff: i64) -> String {
    if diff > 0 {
        format!(" (+{diff})")
    } else if diff < 0 {
        format!(" ({diff})")
    } else {
        String::new()
    }
}

/// Severity banding shared by the title, package, and file rows.
///
/// Returns `(emoji, delta_text)` for a coverage movement. Negative moves
/// escalate from a single :thumbsdown: to stacked :skull: markers by
/// 10-point bands; positive moves step through :thumbsup:, :tada:,
/// :star2:. A zero delta renders the neutral `ø` with no marker.
#[must_use]
pub fn emoji_score(new_percent: f64, old_percent: f64) -> (String, String) {
    let diff = new_percent - old_percent;

    let emoji = if diff < -50.0 {
        ":skull: ".repeat(5)
    } else if diff < -10.0 {
        ":skull: ".repeat((-diff / 10.0) as usize)
    } else if diff < 0.0 {
        ":thumbsdown:".to_string()
    } else if diff == 0.0 {
        String::new()
    } else if diff > 20.0 {
        ":star2:".to_string()
    } else if diff > 10.0 {
        ":tada:".to_string()
    } else {
        ":thumbsup:".to_string()
    };

    let delta_str = if diff == 0.0 {
        "ø".to_string()
    } else {
        format!("**{diff:+.2}%**")
    };

    (emoji, delta_str)
}

/// Absolute banding for the New Code summary row, where there is no old
/// value to diff against.
fn new_code_emoji(percent: f64) -> &'static str {
    if percent >= 90.0 {
        ":star2:"
    } else if percent >= 80.0 {
        ":tada:"
    } else if percent >= 70.0 {
        ":thumbsup:"
    } else if percent >= 50.0 {
        ":neutral_face:"
    } else if percent >= 30.0 {
        ":thumbsdown:"
    } else {
        ":skull:"
    }
}
