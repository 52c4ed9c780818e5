// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::SymbolFacts;

/// The outcome a fixture expects from the engine, encoded by a `pos` or `neg` path segment.
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
    strum_macros::EnumString
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Category {
    /// The engine must not report any defect.
    Pos,
    /// The engine must report a defect.
    Neg,
}

impl Category {
    /// Find the category of a root-relative fixture path. When both `pos` and `neg` appear,
    /// the segment closest to the file wins.
    pub fn from_path(relative: &Path) -> Option<Category> {
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .filter_map(|name| name.parse::<Category>().ok())
            .last()
    }

    pub fn expects_defect(&self) -> bool {
        matches!(self, Category::Neg)
    }
}

/// Whether fixture-provided definitions of standard library functions are replaced by a
/// builtin model (as the engine is expected to do) or executed as written.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OverridePolicy {
    #[default]
    Honor,
    Ignore,
}

/// Defects the reference interpreter can detect.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::VariantNames
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DefectKind {
    NullDereference,
    UseAfterFree,
    DoubleFree,
    InvalidFree,
    OutOfBounds,
    UninitializedRead,
    DivisionByZero,
}

/// What a concrete check expects from calling a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcreteExpectation {
    Returns(i64),
    Defect(DefectKind),
}

impl std::fmt::Display for ConcreteExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcreteExpectation::Returns(value) => write!(f, "returns {value}"),
            ConcreteExpectation::Defect(kind) => write!(f, "{kind}"),
        }
    }
}

/// A `check:` directive: call `function` with `args` and compare against `expectation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteCheck {
    pub function: String,
    pub args: Vec<i64>,
    pub policy: OverridePolicy,
    pub expectation: ConcreteExpectation,
    /// Line of the directive in the fixture source.
    pub line: usize,
}

impl ConcreteCheck {
    /// Render the call part, e.g. `test(0, 5)`.
    pub fn call(&self) -> String {
        let args: Vec<String> = self.args.iter().map(i64::to_string).collect();
        format!("{}({})", self.function, args.join(", "))
    }
}

/// Properties read from directive comments in a fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureProps {
    /// Extra flags for the C compiler
    pub cc_flags: Vec<String>,
    /// Extra flags for the engine
    pub engine_flags: Vec<String>,
    /// The symbol the engine should start from
    pub entry: Option<String>,
    /// Text the engine's defect report must contain (neg fixtures)
    pub expected_defect: Option<String>,
    /// Set when the fixture should be skipped; holds the reason, possibly empty
    pub ignore: Option<String>,
    pub checks: Vec<ConcreteCheck>,
}

/// The symbol used when a fixture does not name one.
pub const DEFAULT_ENTRY: &str = "test";

/// A fixture as loaded from disk and normalized. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Path of the source relative to the fixture root, always `/`-separated
    pub id: String,
    pub source_path: PathBuf,
    #[serde(skip)]
    pub source: String,
    pub category: Category,
    pub props: FixtureProps,
    /// A binary shipped next to the source, if any
    pub prebuilt: Option<PathBuf>,
    pub facts: SymbolFacts,
}

impl Fixture {
    pub fn entry(&self) -> &str {
        self.props.entry.as_deref().unwrap_or(DEFAULT_ENTRY)
    }

    pub fn expectation(&self) -> crate::Expectation {
        match self.category {
            Category::Pos => crate::Expectation::NoDefect,
            Category::Neg => {
                crate::Expectation::Defect { matching: self.props.expected_defect.clone() }
            }
        }
    }
}
