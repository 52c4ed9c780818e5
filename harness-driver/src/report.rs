// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-fixture result lines, the final summary and the JSON report.

use anyhow::{Context, Result};
use console::style;
use harness_metadata::{Outcome, Verdict};
use serde::Serialize;
use std::path::Path;

use crate::harness_runner::{FixtureResult, HarnessResults};
use crate::session::HarnessSession;

// Increment whenever the JSON report format changes.
const REPORT_VERSION: &str = "0.1";

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    results: Vec<JsonResult<'a>>,
    totals: Totals,
}

#[derive(Debug, Serialize)]
struct JsonResult<'a> {
    #[serde(flatten)]
    verdict: &'a Verdict,
    runtime_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct Totals {
    passed: usize,
    failed: usize,
    errors: usize,
    ignored: usize,
    total: usize,
}

impl Totals {
    fn of(results: &HarnessResults) -> Totals {
        Totals {
            passed: results.passed(),
            failed: results.failed(),
            errors: results.errors(),
            ignored: results.ignored(),
            total: results.results.len(),
        }
    }
}

/// One line per fixture, e.g. `PASS refine/pos/malloc-free/test.c (0.21s)`, followed by the
/// diagnostic of anything that did not pass.
pub fn result_line(result: &FixtureResult) -> String {
    let verdict = &result.verdict;
    let tag = match verdict.outcome {
        Outcome::Passed => style("PASS").green(),
        Outcome::Ignored { .. } => style("IGNORED").yellow(),
        Outcome::Failed { .. } => style("FAIL").red(),
        Outcome::Error { .. } => style("ERROR").red(),
    }
    .bold();
    let runtime = result.runtime.as_secs_f64();
    match &verdict.outcome {
        Outcome::Passed => format!("{tag} {} ({runtime:.2}s)", verdict.fixture),
        Outcome::Ignored { .. } => format!("{tag} {} ({})", verdict.fixture, verdict.diagnostic),
        Outcome::Failed { stage, .. } | Outcome::Error { stage, .. } => {
            let (fixture, diagnostic) = (&verdict.fixture, &verdict.diagnostic);
            format!("{tag} {fixture} ({runtime:.2}s)\n    {stage}: {diagnostic}")
        }
    }
}

fn summary_line(totals: &Totals) -> String {
    format!(
        "Complete - {} passed, {} failed, {} errors, {} ignored, {} total.",
        totals.passed, totals.failed, totals.errors, totals.ignored, totals.total
    )
}

fn write_json_report(path: &Path, results: &HarnessResults) -> Result<()> {
    let report = JsonReport {
        version: REPORT_VERSION,
        results: results
            .results
            .iter()
            .map(|r| JsonResult { verdict: &r.verdict, runtime_secs: r.runtime.as_secs_f64() })
            .collect(),
        totals: Totals::of(results),
    };
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write JSON report to `{}`", path.display()))
}

impl HarnessSession {
    /// Concludes a session by printing the results and a summary, and writing the JSON report.
    /// Returns whether every fixture succeeded.
    ///
    /// Note: Takes `self` "by ownership" so the temporary files are gone before the caller
    /// exits.
    pub(crate) fn print_final_summary(self, results: &HarnessResults) -> Result<bool> {
        let totals = Totals::of(results);
        if !self.args.common_args.quiet {
            for result in &results.results {
                println!("{}", result_line(result));
            }
            let failures: Vec<&str> = results
                .verdicts()
                .filter(|v| !v.success)
                .map(|v| v.fixture.as_str())
                .collect();
            if !failures.is_empty() {
                println!("\nSummary:");
                for fixture in failures {
                    println!("Check failed for - {fixture}");
                }
            }
            println!("{}", summary_line(&totals));
        }
        if let Some(path) = &self.args.json_report {
            write_json_report(path, results)?;
        }
        Ok(results.all_succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_metadata::{Category, Stage};
    use std::time::Duration;

    fn results() -> HarnessResults {
        let verdicts = [
            Verdict::passed("a/pos/x/test.c", Category::Pos, "no defect".into()),
            Verdict::failed(
                "a/neg/y/test.c",
                Category::Neg,
                Stage::Check,
                "a defect".into(),
                "no defect".into(),
            ),
            Verdict::ignored("a/pos/z/test.c", Category::Pos, ""),
            Verdict::error("b/test.c", None, Stage::Discovery, "uncategorized".into()),
        ];
        HarnessResults {
            results: verdicts
                .into_iter()
                .map(|verdict| FixtureResult { verdict, runtime: Duration::from_millis(250) })
                .collect(),
        }
    }

    #[test]
    fn check_result_lines() {
        console::set_colors_enabled(false);
        let results = results();
        let lines: Vec<String> = results.results.iter().map(result_line).collect();
        assert_eq!(lines[0], "PASS a/pos/x/test.c (0.25s)");
        let failure = "FAIL a/neg/y/test.c (0.25s)\n    check: expected a defect, got no defect";
        assert_eq!(lines[1], failure);
        assert_eq!(lines[2], "IGNORED a/pos/z/test.c (ignored)");
        assert_eq!(lines[3], "ERROR b/test.c (0.25s)\n    discovery: uncategorized");
    }

    #[test]
    fn check_summary() {
        let totals = Totals::of(&results());
        let expected = "Complete - 1 passed, 1 failed, 1 errors, 1 ignored, 4 total.";
        assert_eq!(summary_line(&totals), expected);
    }

    #[test]
    fn check_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json_report(&path, &results()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], "0.1");
        assert_eq!(json["totals"]["total"], 4);
        assert_eq!(json["results"][1]["fixture"], "a/neg/y/test.c");
        assert_eq!(json["results"][1]["outcome"]["outcome"], "failed");
        assert_eq!(json["results"][1]["outcome"]["stage"], "check");
        assert_eq!(json["results"][3]["category"], serde_json::Value::Null);
        assert_eq!(json["results"][0]["runtime_secs"], 0.25);
    }
}
