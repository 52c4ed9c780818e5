// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recover the engine's verdict from its textual output.
//!
//! The engine's output format is not ours to define, so the two lines we look for are given by
//! regular expressions. A line matching the defect pattern always wins over one matching the
//! pass pattern, and output matching neither carries no verdict at all.

use anyhow::{Context, Result};
use harness_metadata::EngineReport;
use regex::Regex;

use crate::args::RunArgs;

#[derive(Debug, Clone)]
pub struct OutputPatterns {
    pub pass: Regex,
    pub defect: Regex,
}

impl OutputPatterns {
    pub fn new(args: &RunArgs) -> Result<Self> {
        let pass = Regex::new(&args.pass_pattern)
            .with_context(|| format!("Invalid pass pattern `{}`", args.pass_pattern))?;
        let defect = Regex::new(&args.defect_pattern)
            .with_context(|| format!("Invalid defect pattern `{}`", args.defect_pattern))?;
        Ok(OutputPatterns { pass, defect })
    }
}

/// Look through stdout, then stderr. The defect summary is the first matching line, trimmed.
pub fn parse_engine_output(
    stdout: &str,
    stderr: &str,
    patterns: &OutputPatterns,
) -> Option<EngineReport> {
    let lines = || stdout.lines().chain(stderr.lines()).map(str::trim_end);
    if let Some(line) = lines().find(|line| patterns.defect.is_match(line)) {
        return Some(EngineReport::Defect { summary: line.trim().to_string() });
    }
    lines().any(|line| patterns.pass.is_match(line)).then_some(EngineReport::NoDefect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::StandaloneArgs;
    use clap::Parser;

    fn default_patterns() -> OutputPatterns {
        let args = StandaloneArgs::parse_from(["grease-harness", "fixtures"]);
        OutputPatterns::new(&args.run_opts).unwrap()
    }

    #[test]
    fn check_pass_verdict() {
        let patterns = default_patterns();
        let stdout = "Loading binary\nAll goals passed!\n";
        assert_eq!(parse_engine_output(stdout, "", &patterns), Some(EngineReport::NoDefect));
    }

    #[test]
    fn check_defect_wins() {
        let patterns = default_patterns();
        let stdout = "All goals passed!\n";
        let stderr = "warning: something\nLikely bug: null dereference at 0x401000  \n";
        assert_eq!(
            parse_engine_output(stdout, stderr, &patterns),
            Some(EngineReport::Defect {
                summary: "Likely bug: null dereference at 0x401000".to_string()
            })
        );
    }

    #[test]
    fn check_no_verdict() {
        let patterns = default_patterns();
        assert_eq!(parse_engine_output("", "", &patterns), None);
        // Anchored patterns must not match in the middle of a line.
        assert_eq!(parse_engine_output("note: All goals passed\n", "", &patterns), None);
    }

    #[test]
    fn check_custom_patterns() {
        let args = StandaloneArgs::parse_from([
            "grease-harness",
            "fixtures",
            "--pass-pattern",
            "^OK$",
            "--defect-pattern",
            "^BUG",
        ]);
        let patterns = OutputPatterns::new(&args.run_opts).unwrap();
        assert_eq!(parse_engine_output("OK\n", "", &patterns), Some(EngineReport::NoDefect));
        assert_eq!(
            parse_engine_output("", "BUG: uaf\n", &patterns),
            Some(EngineReport::Defect { summary: "BUG: uaf".to_string() })
        );
        assert_eq!(parse_engine_output("All goals passed\n", "", &patterns), None);
    }
}
