// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Directives embedded in fixture sources as `// name: value` line comments.

use harness_metadata::{
    ConcreteCheck, ConcreteExpectation, DefectKind, FixtureProps, OverridePolicy,
};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// `f(1, -2) == 3` or `f() => null-dereference`
static CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*\(([^)]*)\)\s*(==|=>)\s*(\S+)$")
        .expect("the check directive pattern is valid")
});

/// A directive that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveError {
    pub line: usize,
    pub message: String,
}

/// Read every directive of a fixture.
pub fn parse_props(source: &str) -> Result<FixtureProps, DirectiveError> {
    let mut props = FixtureProps::default();
    for (idx, ln) in source.lines().enumerate() {
        let line = idx + 1;
        let Some(comment) = ln.trim().strip_prefix("//") else {
            continue;
        };
        let directive = comment.trim();
        let error = |message: String| DirectiveError { line, message };

        if let Some(flags) = parse_name_value_directive(directive, "cc-flags") {
            props.cc_flags.extend(flags.split_whitespace().map(str::to_owned));
        } else if let Some(flags) = parse_name_value_directive(directive, "engine-flags") {
            props.engine_flags.extend(flags.split_whitespace().map(str::to_owned));
        } else if let Some(entry) = parse_name_value_directive(directive, "entry") {
            if entry.is_empty() {
                return Err(error("`entry` needs a symbol name".into()));
            }
            if props.entry.replace(entry.to_string()).is_some() {
                return Err(error("multiple `entry` directives in a single fixture".into()));
            }
        } else if let Some(text) = parse_name_value_directive(directive, "expect-defect") {
            if props.expected_defect.replace(text.to_string()).is_some() {
                return Err(error("multiple `expect-defect` directives in a single fixture".into()));
            }
        } else if let Some(check) = parse_name_value_directive(directive, "check") {
            props.checks.push(parse_check(check, OverridePolicy::Honor, line).map_err(error)?);
        } else if let Some(check) = parse_name_value_directive(directive, "check-without-overrides")
        {
            props.checks.push(parse_check(check, OverridePolicy::Ignore, line).map_err(error)?);
        } else if let Some(reason) = parse_name_value_directive(directive, "ignore") {
            props.ignore = Some(reason.to_string());
        } else if parse_name_directive(directive, "ignore") {
            props.ignore.get_or_insert_with(String::new);
        }
    }
    debug!(?props, "parse_props");
    Ok(props)
}

fn parse_name_directive(line: &str, directive: &str) -> bool {
    // Ensure the directive is a whole word: `ignored because` is a plain comment.
    line == directive
}

/// `name: value` with the value trimmed.
fn parse_name_value_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    let colon = directive.len();
    if line.starts_with(directive) && line.as_bytes().get(colon) == Some(&b':') {
        Some(line[(colon + 1)..].trim())
    } else {
        None
    }
}

fn parse_check(text: &str, policy: OverridePolicy, line: usize) -> Result<ConcreteCheck, String> {
    let captures = CHECK_RE.captures(text).ok_or_else(|| {
        format!("malformed check `{text}`, expected `f(args) == value` or `f(args) => defect`")
    })?;
    let function = captures[1].to_string();
    let args = captures[2]
        .split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(|arg| parse_int(arg).ok_or_else(|| format!("invalid integer argument `{arg}`")))
        .collect::<Result<Vec<_>, _>>()?;
    let expected = &captures[4];
    let expectation = if &captures[3] == "==" {
        let value =
            parse_int(expected).ok_or_else(|| format!("invalid expected value `{expected}`"))?;
        ConcreteExpectation::Returns(value)
    } else {
        let kind = expected.parse::<DefectKind>().map_err(|_| {
            let known: &[&str] = <DefectKind as strum::VariantNames>::VARIANTS;
            format!("unknown defect kind `{expected}`, expected one of: {}", known.join(", "))
        })?;
        ConcreteExpectation::Defect(kind)
    };
    Ok(ConcreteCheck { function, args, policy, expectation, line })
}

/// Decimal or `0x` hexadecimal, optionally negative.
fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_flags_and_entry() {
        let src = "// cc-flags: -O1 -g\n\
                   // engine-flags: --rust\n\
                   //   entry: main\n\
                   // unrelated: comment\n\
                   int main(void) { return 0; } // cc-flags: -O3\n";
        let props = parse_props(src).unwrap();
        assert_eq!(props.cc_flags, vec!["-O1", "-g"]);
        assert_eq!(props.engine_flags, vec!["--rust"]);
        assert_eq!(props.entry.as_deref(), Some("main"));
        assert!(props.ignore.is_none());
        assert!(props.checks.is_empty());
    }

    #[test]
    fn check_ignore_forms() {
        assert_eq!(parse_props("// ignore\n").unwrap().ignore.as_deref(), Some(""));
        assert_eq!(
            parse_props("// ignore: needs arm\n").unwrap().ignore.as_deref(),
            Some("needs arm")
        );
        assert!(parse_props("// ignored because\n").unwrap().ignore.is_none());
    }

    #[test]
    fn check_concrete_directives() {
        let src = "// check: test(0) == -1\n\
                   // check: test(5, 0x10) == 6\n\
                   // check-without-overrides: test() => null-dereference\n";
        let props = parse_props(src).unwrap();
        assert_eq!(props.checks.len(), 3);
        assert_eq!(props.checks[0].expectation, ConcreteExpectation::Returns(-1));
        assert_eq!(props.checks[0].line, 1);
        assert_eq!(props.checks[1].args, vec![5, 16]);
        assert_eq!(props.checks[2].policy, OverridePolicy::Ignore);
        assert_eq!(
            props.checks[2].expectation,
            ConcreteExpectation::Defect(DefectKind::NullDereference)
        );
    }

    #[test]
    fn check_bad_directives() {
        let err = parse_props("int x;\n// check: test(0) = 1\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_props("// check: test(a) == 1").is_err());
        assert!(parse_props("// check: test() => segfault").is_err());
        assert!(parse_props("// entry: a\n// entry: b\n").is_err());
        assert!(parse_props("// entry:\n").is_err());
    }
}
