// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use serde::{Deserialize, Serialize};

/// Standard library allocation functions a fixture may redefine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StdlibFunction {
    Malloc,
    Calloc,
    Realloc,
    Free,
}

impl StdlibFunction {
    pub fn from_symbol(name: &str) -> Option<StdlibFunction> {
        name.parse().ok()
    }
}

/// How a function asks to be inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Inlining {
    #[default]
    Default,
    /// The `inline` keyword
    Inline,
    /// `__attribute__((noinline))`
    NoInline,
    /// `__attribute__((always_inline))`
    AlwaysInline,
}

/// An attribute as written, e.g. `section(".data")` is `{ name: "section", args: [".data"] }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFact {
    pub name: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for AttributeFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}({})", self.name, self.args.join(", "))
        }
    }
}

/// What we know about one function symbol, merged over all its declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFacts {
    pub name: String,
    /// Line of the first declaration
    pub line: usize,
    pub is_definition: bool,
    pub is_static: bool,
    pub section: Option<String>,
    pub inlining: Inlining,
    pub attributes: Vec<AttributeFact>,
    /// Set when this is a definition of a standard library function
    pub overrides: Option<StdlibFunction>,
}

/// Whether the engine should use its own standard library model or the fixture asks for
/// specific functions to be overridden. Kept explicit so "no override" is never confused
/// with "override silently ignored".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode", content = "functions")]
pub enum OverrideMode {
    #[default]
    EngineBuiltins,
    FixtureOverrides(Vec<StdlibFunction>),
}

impl OverrideMode {
    pub fn overridden(&self) -> &[StdlibFunction] {
        match self {
            OverrideMode::EngineBuiltins => &[],
            OverrideMode::FixtureOverrides(functions) => functions,
        }
    }
}

impl std::fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideMode::EngineBuiltins => f.write_str("engine builtins"),
            OverrideMode::FixtureOverrides(functions) => {
                let names: Vec<&str> = functions.iter().map(|f| f.as_ref()).collect();
                write!(f, "overrides {}", names.join(", "))
            }
        }
    }
}

/// Symbol facts of one translation unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SymbolFacts {
    /// Functions in order of first declaration
    pub functions: Vec<FunctionFacts>,
    pub overrides: OverrideMode,
    /// Top-level items the parser could not understand and skipped
    pub skipped_items: usize,
}

impl SymbolFacts {
    pub fn function(&self, name: &str) -> Option<&FunctionFacts> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_stdlib_names() {
        assert_eq!(StdlibFunction::from_symbol("malloc"), Some(StdlibFunction::Malloc));
        assert_eq!(StdlibFunction::from_symbol("free"), Some(StdlibFunction::Free));
        assert_eq!(StdlibFunction::from_symbol("Malloc"), None);
        assert_eq!(StdlibFunction::from_symbol("memcpy"), None);
    }

    #[test]
    fn check_override_mode_json() {
        let builtins = serde_json::to_value(OverrideMode::EngineBuiltins).unwrap();
        assert_eq!(builtins, serde_json::json!({ "mode": "engine-builtins" }));
        let overrides = OverrideMode::FixtureOverrides(vec![StdlibFunction::Malloc]);
        assert_eq!(
            serde_json::to_value(&overrides).unwrap(),
            serde_json::json!({ "mode": "fixture-overrides", "functions": ["malloc"] })
        );
        assert_eq!(overrides.to_string(), "overrides malloc");
    }
}
