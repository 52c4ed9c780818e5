// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A reference interpreter for fixture functions. It executes the C subset fixtures are
//! written in on concrete inputs, and is used to evaluate `check:` directives without
//! involving the engine.

mod eval;
pub mod memory;

pub use eval::{Defect, EvalError};

use eval::Interpreter;

use crate::c_decls::ast::TranslationUnit;
use harness_metadata::{ConcreteCheck, ConcreteExpectation, OverridePolicy};
use thiserror::Error;
use tracing::debug;

/// What calling a function produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcreteResult {
    Returned(i64),
    Defect(Defect),
}

impl std::fmt::Display for ConcreteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcreteResult::Returned(value) => write!(f, "returned {value}"),
            ConcreteResult::Defect(defect) => write!(f, "{defect}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckError {
    /// The call completed but not as the directive expected.
    #[error("line {line}: `{call}` expected {expected}, got {actual}")]
    Mismatch { line: usize, call: String, expected: String, actual: String },
    /// The call could not be evaluated at all.
    #[error("line {line}: `{call}` could not be evaluated: {source}")]
    Eval {
        line: usize,
        call: String,
        #[source]
        source: EvalError,
    },
}

/// Call `function(args)` in a fresh memory. Defects are results, everything else is an error.
pub fn evaluate(
    unit: &TranslationUnit,
    function: &str,
    args: &[i64],
    policy: OverridePolicy,
) -> Result<ConcreteResult, EvalError> {
    let outcome = Interpreter::new(unit, policy).and_then(|mut interp| interp.call(function, args));
    match outcome {
        Ok(value) => Ok(ConcreteResult::Returned(value)),
        Err(EvalError::Defect(defect)) => Ok(ConcreteResult::Defect(defect)),
        Err(error) => Err(error),
    }
}

/// Evaluate one `check:` directive.
pub fn run_check(unit: &TranslationUnit, check: &ConcreteCheck) -> Result<(), CheckError> {
    let call = check.call();
    let result = evaluate(unit, &check.function, &check.args, check.policy).map_err(|source| {
        CheckError::Eval { line: check.line, call: call.clone(), source }
    })?;
    debug!(%call, policy = %check.policy, %result, "concrete check");
    let matched = match (&check.expectation, &result) {
        (ConcreteExpectation::Returns(expected), ConcreteResult::Returned(actual)) => {
            expected == actual
        }
        (ConcreteExpectation::Defect(expected), ConcreteResult::Defect(actual)) => {
            *expected == actual.kind
        }
        _ => false,
    };
    if matched {
        Ok(())
    } else {
        Err(CheckError::Mismatch {
            line: check.line,
            call,
            expected: check.expectation.to_string(),
            actual: result.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c_decls::parse_translation_unit;
    use harness_metadata::DefectKind;

    fn evaluate_source(
        source: &str,
        function: &str,
        args: &[i64],
        policy: OverridePolicy,
    ) -> Result<ConcreteResult, EvalError> {
        let unit = parse_translation_unit(source).map_err(|error| EvalError::Parse {
            function: function.to_string(),
            error,
        })?;
        evaluate(&unit, function, args, policy)
    }

    fn fixture_source(id: &str) -> String {
        let path = format!("{}/../tests/grease/{id}", env!("CARGO_MANIFEST_DIR"));
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn check_data_if_branches() {
        let src = fixture_source("prop/in-text/pos/data_if/test.c");
        let returned = |value| Ok(ConcreteResult::Returned(value));
        for policy in [OverridePolicy::Honor, OverridePolicy::Ignore] {
            // x = 0 takes the `dec` branch, x = 5 the `inc` branch.
            assert_eq!(evaluate_source(&src, "test", &[0], policy), returned(-1));
            assert_eq!(evaluate_source(&src, "test", &[5], policy), returned(6));
        }
        assert_eq!(evaluate_source(&src, "dec", &[0], OverridePolicy::Honor), returned(-1));
    }

    #[test]
    fn check_malloc_free_override() {
        let src = fixture_source("refine/pos/malloc-free/test.c");
        let honored = evaluate_source(&src, "test", &[], OverridePolicy::Honor);
        assert_eq!(honored, Ok(ConcreteResult::Returned(42)));

        let ignored = evaluate_source(&src, "test", &[], OverridePolicy::Ignore).unwrap();
        let ConcreteResult::Defect(defect) = ignored else {
            panic!("the stub malloc should lead to a null dereference, got {ignored}");
        };
        assert_eq!(defect.kind, DefectKind::NullDereference);
        assert_eq!(defect.function, "test");
    }

    #[test]
    fn check_run_check() {
        let unit = parse_translation_unit("int twice(int x) { return 2 * x; }\n").unwrap();
        let mut check = ConcreteCheck {
            function: "twice".into(),
            args: vec![21],
            policy: OverridePolicy::Honor,
            expectation: ConcreteExpectation::Returns(42),
            line: 3,
        };
        assert!(run_check(&unit, &check).is_ok());

        check.expectation = ConcreteExpectation::Returns(41);
        let err = run_check(&unit, &check).unwrap_err();
        assert_eq!(err.to_string(), "line 3: `twice(21)` expected returns 41, got returned 42");

        check.expectation = ConcreteExpectation::Defect(DefectKind::OutOfBounds);
        assert!(matches!(run_check(&unit, &check), Err(CheckError::Mismatch { .. })));

        check.function = "thrice".into();
        assert!(matches!(
            run_check(&unit, &check),
            Err(CheckError::Eval { source: EvalError::UnknownFunction(_), .. })
        ));
    }

    #[test]
    fn check_defect_expectation() {
        let unit = parse_translation_unit("int f(int d) { return 1 / d; }\n").unwrap();
        let check = ConcreteCheck {
            function: "f".into(),
            args: vec![0],
            policy: OverridePolicy::Ignore,
            expectation: ConcreteExpectation::Defect(DefectKind::DivisionByZero),
            line: 1,
        };
        assert!(run_check(&unit, &check).is_ok());
    }
}
