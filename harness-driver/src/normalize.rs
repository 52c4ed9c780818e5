// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Record the placement, inlining and override facts of a fixture's functions.

use crate::c_decls::ast::{Attribute, TranslationUnit};
use crate::c_decls::{ParseError, parse_translation_unit};
use crate::discovery::FixtureFile;
use harness_metadata::{
    AttributeFact, Fixture, FunctionFacts, Inlining, OverrideMode, StdlibFunction, SymbolFacts,
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("cannot parse `{}`: {source}", path.display())]
pub struct NormalizeError {
    pub path: PathBuf,
    #[source]
    pub source: ParseError,
}

/// Turn a loaded fixture file into an immutable [`Fixture`] with its symbol facts.
pub fn normalize(file: FixtureFile) -> Result<Fixture, NormalizeError> {
    let unit = parse_translation_unit(&file.source)
        .map_err(|source| NormalizeError { path: file.source_path.clone(), source })?;
    for skipped in &unit.skipped {
        warn!(
            fixture = %file.id,
            line = skipped.line,
            reason = %skipped.reason,
            "skipped declaration"
        );
    }
    let facts = symbol_facts(&unit);
    let fixture = Fixture {
        id: file.id,
        source_path: file.source_path,
        source: file.source,
        category: file.category,
        props: file.props,
        prebuilt: file.prebuilt,
        facts,
    };
    if fixture.facts.function(fixture.entry()).is_none() {
        warn!(fixture = %fixture.id, entry = fixture.entry(), "entry symbol is not declared");
    }
    debug!(fixture = %fixture.id, overrides = %fixture.facts.overrides, "normalize");
    Ok(fixture)
}

/// Merge all declarations of each function into one set of facts.
pub fn symbol_facts(unit: &TranslationUnit) -> SymbolFacts {
    let mut functions: Vec<FunctionFacts> = Vec::new();
    for decl in &unit.functions {
        let idx = match functions.iter().position(|f| f.name == decl.name) {
            Some(idx) => idx,
            None => {
                functions.push(FunctionFacts {
                    name: decl.name.clone(),
                    line: decl.line,
                    is_definition: false,
                    is_static: false,
                    section: None,
                    inlining: Inlining::Default,
                    attributes: vec![],
                    overrides: None,
                });
                functions.len() - 1
            }
        };
        let facts = &mut functions[idx];
        facts.is_static |= decl.is_static;
        if decl.is_inline && facts.inlining == Inlining::Default {
            facts.inlining = Inlining::Inline;
        }
        for attribute in decl.attributes.iter().map(normalize_attribute) {
            match attribute.name.as_str() {
                "section" if facts.section.is_none() => {
                    facts.section = attribute.args.first().cloned();
                }
                "noinline" => facts.inlining = Inlining::NoInline,
                "always_inline" => facts.inlining = Inlining::AlwaysInline,
                _ => {}
            }
            if !facts.attributes.contains(&attribute) {
                facts.attributes.push(attribute);
            }
        }
        if decl.body.is_some() {
            facts.is_definition = true;
            facts.overrides = StdlibFunction::from_symbol(&decl.name);
        }
    }

    let mut overridden: Vec<StdlibFunction> =
        functions.iter().filter_map(|f| f.overrides).collect();
    overridden.sort();
    overridden.dedup();
    let overrides = if overridden.is_empty() {
        OverrideMode::EngineBuiltins
    } else {
        OverrideMode::FixtureOverrides(overridden)
    };
    SymbolFacts { functions, overrides, skipped_items: unit.skipped.len() }
}

/// `__noinline__` and `noinline` are the same attribute.
fn normalize_attribute(attribute: &Attribute) -> AttributeFact {
    let name = attribute.name.as_str();
    let name = match name.strip_prefix("__").and_then(|n| n.strip_suffix("__")) {
        Some(inner) if !inner.is_empty() => inner,
        _ => name,
    };
    AttributeFact { name: name.to_string(), args: attribute.args.clone() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_metadata::{Category, FixtureProps};

    fn facts(src: &str) -> SymbolFacts {
        symbol_facts(&parse_translation_unit(src).unwrap())
    }

    #[test]
    fn check_data_if_facts() {
        let src = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../tests/grease/prop/in-text/pos/data_if/test.c"
        ))
        .unwrap();
        let facts = facts(&src);
        let inc = facts.function("inc").unwrap();
        assert_eq!(inc.section.as_deref(), Some(".data"));
        assert_eq!(inc.inlining, Inlining::Default);
        let dec = facts.function("dec").unwrap();
        assert_eq!(dec.inlining, Inlining::NoInline);
        assert!(dec.section.is_none());
        assert!(facts.function("test").unwrap().is_definition);
        assert_eq!(facts.overrides, OverrideMode::EngineBuiltins);
        assert_eq!(facts.skipped_items, 0);
    }

    #[test]
    fn check_malloc_free_facts() {
        let src = std::fs::read_to_string(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../tests/grease/refine/pos/malloc-free/test.c"
        ))
        .unwrap();
        let facts = facts(&src);
        assert_eq!(
            facts.overrides,
            OverrideMode::FixtureOverrides(vec![StdlibFunction::Malloc, StdlibFunction::Free])
        );
        assert_eq!(facts.function("malloc").unwrap().overrides, Some(StdlibFunction::Malloc));
        assert_eq!(facts.function("test").unwrap().overrides, None);
    }

    #[test]
    fn check_float_and_dollar_helpers_keep_facts() {
        let src = "__attribute__((noinline)) double half(void) { return 1.5e0; }\n\
                   static int count$ = 0;\n\
                   int test(void) { return half() > 0.5; }\n";
        let facts = facts(src);
        assert_eq!(facts.skipped_items, 0);
        assert_eq!(facts.function("half").unwrap().inlining, Inlining::NoInline);
        assert!(facts.function("test").unwrap().is_definition);
    }

    #[test]
    fn check_prototypes_do_not_override() {
        let facts = facts("void *malloc(unsigned long n);\nvoid free(void *p);\nint test(void);\n");
        assert_eq!(facts.overrides, OverrideMode::EngineBuiltins);
        assert!(!facts.function("malloc").unwrap().is_definition);
    }

    #[test]
    fn check_declarations_merge() {
        let src = "static inline int f(int) __attribute__((__always_inline__));\n\
                   int g(void);\n\
                   int f(int x) { return x; }\n\
                   __attribute__((section(\".text.hot\"), used)) int g(void) { return 1; }\n";
        let facts = facts(src);
        assert_eq!(facts.functions.len(), 2);
        let f = facts.function("f").unwrap();
        assert!(f.is_definition && f.is_static);
        assert_eq!(f.line, 1);
        assert_eq!(f.inlining, Inlining::AlwaysInline);
        let g = facts.function("g").unwrap();
        assert_eq!(g.section.as_deref(), Some(".text.hot"));
        assert_eq!(
            g.attributes.iter().map(ToString::to_string).collect::<Vec<_>>(),
            ["section(.text.hot)", "used"]
        );
    }

    #[test]
    fn check_skipped_items_are_counted() {
        let facts = facts("int (*handler)(int);\nint test(void) { return 0; }\n");
        assert_eq!(facts.skipped_items, 1);
        assert!(facts.function("test").is_some());
    }

    #[test]
    fn check_normalize_fixture() {
        let file = FixtureFile {
            id: "refine/pos/x/test.c".into(),
            source_path: "refine/pos/x/test.c".into(),
            source: "int test(void) { return 0; }\n".into(),
            category: Category::Pos,
            props: FixtureProps::default(),
            prebuilt: None,
        };
        let fixture = normalize(file.clone()).unwrap();
        assert_eq!(fixture.entry(), "test");
        assert_eq!(fixture.facts.functions.len(), 1);

        let broken = FixtureFile { source: "int x = 1; /* unterminated".into(), ..file };
        assert!(normalize(broken).is_err());
    }
}
