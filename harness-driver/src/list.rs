// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Implements the list subcommand logic

use anyhow::Result;
use comfy_table::{ContentArrangement, Table, TableComponent};
use harness_metadata::{Fixture, FunctionFacts};
use serde_json::json;

use crate::args::{ListArgs, ListFormat};
use crate::discovery::FixtureLoader;
use crate::normalize::normalize;
use crate::util::warning;

// Increment whenever the JSON output format changes.
const FILE_VERSION: &str = "0.1";

/// Entry point for `grease-harness list`.
pub fn list_standalone(args: &ListArgs) -> Result<()> {
    let loader = FixtureLoader {
        root: args.root.clone(),
        filters: args.filters.clone(),
        exact: args.selection.exact,
        arch: args.selection.arch.clone(),
    };
    let mut fixtures = vec![];
    let mut problems = 0;
    for loaded in loader.fixtures() {
        match loaded.map_err(anyhow::Error::from).and_then(|f| Ok(normalize(f)?)) {
            Ok(fixture) => fixtures.push(fixture),
            Err(err) => {
                problems += 1;
                if !args.common_args.quiet {
                    warning(&format!("{err:#}"));
                }
            }
        }
    }
    match args.format {
        ListFormat::Pretty => println!("{}", pretty(&fixtures, problems)),
        ListFormat::Json => {
            let json = json_output(&fixtures, problems);
            println!("{}", serde_json::to_string_pretty(&json)?)
        }
    }
    Ok(())
}

fn table_new() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
        .load_preset(comfy_table::presets::NOTHING)
        .set_style(TableComponent::HeaderLines, '-')
        .set_style(TableComponent::MiddleHeaderIntersections, '+')
        .set_style(TableComponent::VerticalLines, '|');
    table
}

/// Functions worth showing: the ones carrying attributes or overriding the standard library.
fn notable(function: &FunctionFacts) -> Option<String> {
    if function.attributes.is_empty() && function.overrides.is_none() {
        return None;
    }
    let attributes: Vec<String> = function.attributes.iter().map(ToString::to_string).collect();
    Some(format!("{}: {}", function.name, attributes.join(", ")).trim_end_matches(": ").to_string())
}

fn pretty(fixtures: &[Fixture], problems: usize) -> String {
    if fixtures.is_empty() {
        return "No fixtures found.".to_string();
    }
    let mut table = table_new();
    table.set_header(vec!["Fixture", "Category", "Entry", "Overrides", "Attributes"]);
    for fixture in fixtures {
        let attributes: Vec<String> = fixture.facts.functions.iter().filter_map(notable).collect();
        table.add_row(vec![
            fixture.id.clone(),
            fixture.category.to_string(),
            fixture.entry().to_string(),
            fixture.facts.overrides.to_string(),
            attributes.join("\n"),
        ]);
    }
    let mut out = table.to_string();
    out.push_str(&format!("\n\nFixtures: {}", fixtures.len()));
    if problems > 0 {
        out.push_str(&format!(", could not be loaded: {problems}"));
    }
    out
}

fn json_output(fixtures: &[Fixture], problems: usize) -> serde_json::Value {
    json!({
        "file-version": FILE_VERSION,
        "fixtures": fixtures,
        "totals": {
            "fixtures": fixtures.len(),
            "unloadable": problems,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FixtureFile;
    use harness_metadata::{Category, FixtureProps};

    fn fixture(id: &str, source: &str) -> Fixture {
        normalize(FixtureFile {
            id: id.into(),
            source_path: id.into(),
            source: source.into(),
            category: Category::Pos,
            props: FixtureProps::default(),
            prebuilt: None,
        })
        .unwrap()
    }

    #[test]
    fn check_pretty_table() {
        let fixtures = [
            fixture("refine/pos/a/test.c", "void free(void *p) {}\nint test(void) { return 0; }\n"),
            fixture(
                "prop/pos/b/test.c",
                "__attribute__((noinline)) int dec(int x) { return x - 1; }\nint test(void);\n",
            ),
        ];
        let out = pretty(&fixtures, 1);
        assert!(out.contains("refine/pos/a/test.c"));
        assert!(out.contains("overrides free"));
        assert!(out.contains("engine builtins"));
        assert!(out.contains("dec: noinline"));
        assert!(out.ends_with("Fixtures: 2, could not be loaded: 1"));
        assert_eq!(pretty(&[], 0), "No fixtures found.");
    }

    #[test]
    fn check_json_output() {
        let fixtures = [fixture("refine/pos/a/test.c", "void free(void *p) {}\n")];
        let json = json_output(&fixtures, 0);
        assert_eq!(json["file-version"], FILE_VERSION);
        assert_eq!(json["totals"]["fixtures"], 1);
        let facts = &json["fixtures"][0]["facts"];
        assert_eq!(facts["overrides"]["mode"], "fixture-overrides");
        assert_eq!(facts["overrides"]["functions"][0], "free");
        // Sources are not part of the listing.
        assert!(json["fixtures"][0].get("source").is_none());
    }
}
