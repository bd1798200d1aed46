use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use covdelta::cli::{self, ReportArgs, Style};

/// covdelta: compare two Go coverage profiles against a pull request's
/// change-set and report how well the new code is tested.
#[derive(Parser)]
#[command(name = "covdelta", version, about)]
struct Cli {
    /// Baseline coverage profile (go test -coverprofile output).
    old_coverage: PathBuf,

    /// Candidate coverage profile.
    new_coverage: PathBuf,

    /// JSON array of changed file paths, relative to the repository root.
    changed_files: PathBuf,

    /// Import path prefix to qualify changed file paths so they match the
    /// coverage profile keys (e.g. github.com/user/repo).
    #[arg(long, default_value = "")]
    root: String,

    /// Path prefix to strip from all file and package names before
    /// rendering.
    #[arg(long)]
    trim: Option<String>,

    /// Structured change-set JSON file:
    /// {"<path>": {"added_lines": [...], "modified_lines": [...]}}
    #[arg(long, conflicts_with = "diff")]
    changeset: Option<PathBuf>,

    /// Unified diff file (git diff output) to derive the change-set from.
    #[arg(long)]
    diff: Option<PathBuf>,

    /// Minimum coverage percentage required for new code. When the new
    /// code falls below it the report is still printed but the process
    /// exits non-zero.
    #[arg(long, default_value_t = 0.0)]
    min_coverage: f64,

    /// Output format.
    #[arg(long, value_enum, default_value = "markdown")]
    format: Style,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let args = ReportArgs {
        old_coverage: &cli.old_coverage,
        new_coverage: &cli.new_coverage,
        changed_files: &cli.changed_files,
        root: &cli.root,
        trim: cli.trim.as_deref(),
        changeset: cli.changeset.as_deref(),
        diff: cli.diff.as_deref(),
        min_coverage: cli.min_coverage,
    };

    match cli::cmd_report(&args, &cli.format) {
        Ok((output, threshold_failed)) => {
            print!("{output}");
            if threshold_failed {
                eprintln!(
                    "Error: new code coverage is below the required minimum of {:.2}%",
                    cli.min_coverage
                );
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
