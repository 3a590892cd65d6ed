// src/report.rs
//
// Regression report: the shared, append-only `regr.log` and the tally over
// the whole test matrix.
//
// Every write is an append of whole lines. Comparison only starts after all
// simulations have finished, so appends never interleave and no locking is
// needed, whichever backend ran the simulations.
//
// Outputs (under the base output directory):
// - regr.log:          free-text report, ends with "{P} PASSED, {F} FAILED"
// - regr_summary.json: per-run verdicts for tooling

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::compare::{CompareOutcome, RunComparator};
use crate::error::RegressError;
use crate::testlist::TestList;

pub const REPORT_FILE: &str = "regr.log";
pub const SUMMARY_FILE: &str = "regr_summary.json";

/// Handle on the append-only report file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionReport {
    path: PathBuf,
}

impl RegressionReport {
    /// `{output_root}/regr.log`.
    pub fn in_dir(output_root: &Path) -> Self {
        Self::at(output_root.join(REPORT_FILE))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_line(&self, line: &str) -> io::Result<()> {
        self.append_lines([line])
    }

    /// Append lines in one open/write/close cycle.
    pub fn append_lines<I, S>(&self, lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for line in lines {
            writer.write_all(line.as_ref().as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

/// Verdict for one (test, iteration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub test: String,
    pub iteration: u32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outcome of comparing a whole test matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub passes: usize,
    pub fails: usize,
    pub report: String,
    pub runs: Vec<RunRecord>,
}

impl RegressionSummary {
    pub fn all_passed(&self) -> bool {
        self.fails == 0
    }

    /// The closing line of `regr.log`.
    pub fn summary_line(&self) -> String {
        format!("{} PASSED, {} FAILED", self.passes, self.fails)
    }

    /// Write the summary as JSON.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Compare every run of the matrix, tally the verdicts and close the report.
///
/// Must only be called once every simulation of the matrix has finished.
pub fn compare_all(
    tests: &TestList,
    comparator: &RunComparator<'_>,
) -> Result<RegressionSummary, RegressError> {
    let report = comparator.report();
    let mut summary = RegressionSummary {
        passes: 0,
        fails: 0,
        report: report.path().display().to_string(),
        runs: Vec::with_capacity(tests.run_count()),
    };

    for run in tests.runs() {
        let outcome = comparator.compare_run(run.test, run.index);
        let reason = match &outcome {
            CompareOutcome::Pass => {
                summary.passes += 1;
                None
            }
            CompareOutcome::Fail { reason } => {
                summary.fails += 1;
                Some(reason.clone())
            }
        };
        summary.runs.push(RunRecord {
            test: run.test.test.clone(),
            iteration: run.index,
            passed: reason.is_none(),
            reason,
        });
    }

    let line = summary.summary_line();
    report
        .append_line(&line)
        .map_err(|e| report_error(report.path(), e))?;

    tracing::info!("{}", line);
    tracing::info!("RTL & ISS regression report at {}", report.path().display());
    Ok(summary)
}

/// Write `regr_summary.json` next to the report.
pub fn write_summary(summary: &RegressionSummary, output_root: &Path) -> Result<(), RegressError> {
    let path = output_root.join(SUMMARY_FILE);
    summary
        .write_to_file(&path)
        .map_err(|e| report_error(&path, e))
}

fn report_error(path: &Path, e: io::Error) -> RegressError {
    RegressError::Report {
        path: path.display().to_string(),
        source: e.to_string(),
    }
}
