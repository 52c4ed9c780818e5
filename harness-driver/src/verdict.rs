// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use harness_metadata::{EngineReport, Expectation, Fixture};
use thiserror::Error;

/// The engine produced a verdict that disagrees with the fixture's category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, got {actual}")]
pub struct TestFailure {
    pub expected: Expectation,
    pub actual: EngineReport,
}

/// `pos` fixtures pass when no defect is reported. `neg` fixtures pass when a defect is
/// reported whose summary contains the documented defect text, ignoring case.
pub fn check_verdict(fixture: &Fixture, report: &EngineReport) -> Result<(), TestFailure> {
    let expected = fixture.expectation();
    let matches = match (&expected, report) {
        (Expectation::NoDefect, EngineReport::NoDefect) => true,
        (Expectation::Defect { matching: None }, EngineReport::Defect { .. }) => true,
        (Expectation::Defect { matching: Some(text) }, EngineReport::Defect { summary }) => {
            summary.to_lowercase().contains(&text.to_lowercase())
        }
        _ => false,
    };
    if matches { Ok(()) } else { Err(TestFailure { expected, actual: report.clone() }) }
}
