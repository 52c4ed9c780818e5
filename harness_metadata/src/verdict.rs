// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use serde::{Deserialize, Serialize};

use crate::Category;

/// The raw verdict recovered from the engine's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "report")]
pub enum EngineReport {
    NoDefect,
    Defect { summary: String },
}

impl std::fmt::Display for EngineReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineReport::NoDefect => f.write_str("no defect"),
            EngineReport::Defect { summary } => write!(f, "defect: {summary}"),
        }
    }
}

/// What a fixture expects the engine to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "expect")]
pub enum Expectation {
    NoDefect,
    /// A defect, optionally one whose summary contains `matching`
    Defect { matching: Option<String> },
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::NoDefect => f.write_str("no defect"),
            Expectation::Defect { matching: None } => f.write_str("a defect"),
            Expectation::Defect { matching: Some(text) } => write!(f, "a defect matching `{text}`"),
        }
    }
}

/// The pipeline stage an outcome was decided at.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    Discovery,
    Normalize,
    Concrete,
    Compile,
    Engine,
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "outcome")]
pub enum Outcome {
    Passed,
    Ignored { reason: String },
    /// A verdict was produced but disagrees with the expectation
    Failed { stage: Stage, expected: String, actual: String },
    /// No verdict could be produced
    Error { stage: Stage, message: String },
}

/// The harness's judgment on one fixture. Contains no timing, so verdicts of two runs over
/// the same fixtures compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// The fixture id, or the offending path when the fixture could not be loaded
    pub fixture: String,
    pub category: Option<Category>,
    pub success: bool,
    pub diagnostic: String,
    pub outcome: Outcome,
}

impl Verdict {
    pub fn passed(fixture: &str, category: Category, diagnostic: String) -> Verdict {
        Verdict {
            fixture: fixture.to_string(),
            category: Some(category),
            success: true,
            diagnostic,
            outcome: Outcome::Passed,
        }
    }

    pub fn ignored(fixture: &str, category: Category, reason: &str) -> Verdict {
        let diagnostic =
            if reason.is_empty() { "ignored".to_string() } else { format!("ignored: {reason}") };
        Verdict {
            fixture: fixture.to_string(),
            category: Some(category),
            success: true,
            diagnostic,
            outcome: Outcome::Ignored { reason: reason.to_string() },
        }
    }

    pub fn failed(
        fixture: &str,
        category: Category,
        stage: Stage,
        expected: String,
        actual: String,
    ) -> Verdict {
        Verdict {
            fixture: fixture.to_string(),
            category: Some(category),
            success: false,
            diagnostic: format!("expected {expected}, got {actual}"),
            outcome: Outcome::Failed { stage, expected, actual },
        }
    }

    pub fn error(
        fixture: &str,
        category: Option<Category>,
        stage: Stage,
        message: String,
    ) -> Verdict {
        Verdict {
            fixture: fixture.to_string(),
            category,
            success: false,
            diagnostic: message.clone(),
            outcome: Outcome::Error { stage, message },
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self.outcome, Outcome::Ignored { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_verdict_constructors() {
        let v = Verdict::failed(
            "refine/neg/x/test.c",
            Category::Neg,
            Stage::Check,
            Expectation::Defect { matching: None }.to_string(),
            EngineReport::NoDefect.to_string(),
        );
        assert!(!v.success);
        assert_eq!(v.diagnostic, "expected a defect, got no defect");

        let ignored = Verdict::ignored("a/pos/test.c", Category::Pos, "");
        assert!(ignored.success && ignored.is_ignored());
        assert_eq!(ignored.diagnostic, "ignored");

        let error = Verdict::error("a/test.c", None, Stage::Discovery, "unreadable".into());
        assert!(!error.success && error.is_error());
    }

    #[test]
    fn check_outcome_json() {
        let outcome = Outcome::Error { stage: Stage::Engine, message: "timed out".into() };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({ "outcome": "error", "stage": "engine", "message": "timed out" })
        );
    }
}
