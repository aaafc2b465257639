//! Run reports
//!
//! Human-readable rendering of a result tree and JSON export of a
//! [`RunReport`].

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::context::ErrorRecord;
use crate::engine::RunReport;
use crate::error::{ProcrunnerError, Result};
use crate::result::{ProcedureResult, TestResult};

const INDENT: &str = "  ";

fn verdict(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}

/// Result tree rendered one line per node.
///
/// ```text
/// FAIL <root>
///   PASS vbat = 3.3 V (<= 5)
///   FAIL audio
///     FAIL beep: step failed on request
/// ```
pub struct ReportTree<'a>(pub &'a ProcedureResult);

impl fmt::Display for ReportTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let root = self.0;
        write!(f, "{} <root>", verdict(root.passed()))?;
        if let Some(err) = root.err() {
            write!(f, ": {err}")?;
        }
        writeln!(f)?;
        write_children(&root.tests, 1, f)
    }
}

/// Render the result tree to a string. See [`ReportTree`].
pub fn render_tree(root: &ProcedureResult) -> String {
    ReportTree(root).to_string()
}

fn write_children(tests: &[TestResult], depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for test in tests {
        f.write_str(&INDENT.repeat(depth))?;
        write!(f, "{} {}", verdict(!test.failed()), test.step_id())?;

        if let Some(measure) = test.as_measure() {
            if let Some(value) = &measure.value {
                write!(f, " = {value}")?;
                if !measure.unit.is_empty() {
                    write!(f, " {}", measure.unit)?;
                }
            }
            write!(f, " ({})", measure.constraint)?;
        }
        if let Some(duration) = test.meta().duration {
            write!(f, " [{duration} ms]")?;
        }
        if let Some(err) = test.err() {
            write!(f, ": {err}")?;
        }
        writeln!(f)?;

        write_children(test.tests(), depth + 1, f)?;
    }
    Ok(())
}

/// Counts of leaf steps by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_result(root: &ProcedureResult) -> Self {
        let leaves = root.leaves();
        let failed = leaves.iter().filter(|t| t.failed()).count();
        Self {
            total: leaves.len(),
            passed: leaves.len() - failed,
            failed,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps: {} passed, {} failed",
            self.total, self.passed, self.failed
        )
    }
}

#[derive(Serialize)]
struct ReportFile<'a> {
    passed: bool,
    summary: Summary,
    result: &'a ProcedureResult,
    errors: &'a [ErrorRecord],
}

/// Write `report` as pretty-printed JSON.
pub fn write_json<P: AsRef<Path>>(path: P, report: &RunReport) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Err(ProcrunnerError::report(format!(
            "report path {path:?} is a directory"
        )));
    }

    let file = ReportFile {
        passed: report.passed(),
        summary: Summary::from_result(&report.result),
        result: &report.result,
        errors: &report.errors,
    };
    fs::write(path, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}
