// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Find fixtures under a root directory.

use crate::header::{DirectiveError, parse_props};
use crate::util::relative_id;
use harness_metadata::{Category, FixtureProps};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot read directory entry `{}`: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("cannot read fixture `{}`: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{}` is under neither a `pos` nor a `neg` directory", path.display())]
    Uncategorized { path: PathBuf },
    #[error("{}:{line}: {message}", path.display())]
    BadDirective { path: PathBuf, line: usize, message: String },
}

impl DiscoveryError {
    /// The offending path.
    pub fn path(&self) -> &Path {
        match self {
            DiscoveryError::Walk { path, .. }
            | DiscoveryError::Unreadable { path, .. }
            | DiscoveryError::Uncategorized { path }
            | DiscoveryError::BadDirective { path, .. } => path,
        }
    }
}

/// A fixture source read from disk, before its declarations are normalized.
#[derive(Debug, Clone)]
pub struct FixtureFile {
    pub id: String,
    pub source_path: PathBuf,
    pub source: String,
    pub category: Category,
    pub props: FixtureProps,
    pub prebuilt: Option<PathBuf>,
}

/// Enumerates the fixtures under `root`. Every call to [`FixtureLoader::fixtures`] walks the
/// tree again.
#[derive(Debug, Clone)]
pub struct FixtureLoader {
    pub root: PathBuf,
    pub filters: Vec<String>,
    pub exact: bool,
    pub arch: String,
}

impl FixtureLoader {
    pub fn new(root: &Path) -> Self {
        FixtureLoader {
            root: root.to_path_buf(),
            filters: vec![],
            exact: false,
            arch: "x64".into(),
        }
    }

    pub fn fixtures(&self) -> Fixtures<'_> {
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(keep_entry as fn(&walkdir::DirEntry) -> bool);
        Fixtures { loader: self, walker }
    }

    fn is_selected(&self, id: &str) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        if self.exact {
            self.filters.iter().any(|filter| filter == id)
        } else {
            self.filters.iter().any(|filter| id.contains(filter.as_str()))
        }
    }

    fn load(&self, path: &Path, id: String) -> Result<FixtureFile, DiscoveryError> {
        let relative = pathdiff::diff_paths(path, &self.root).unwrap_or_else(|| path.into());
        let category = Category::from_path(&relative)
            .ok_or_else(|| DiscoveryError::Uncategorized { path: path.to_path_buf() })?;
        let source = std::fs::read_to_string(path)
            .map_err(|source| DiscoveryError::Unreadable { path: path.to_path_buf(), source })?;
        let props = parse_props(&source).map_err(|DirectiveError { line, message }| {
            DiscoveryError::BadDirective { path: path.to_path_buf(), line, message }
        })?;
        let prebuilt = self.prebuilt_binary(path);
        debug!(?id, ?category, ?prebuilt, "load");
        Ok(FixtureFile { id, source_path: path.to_path_buf(), source, category, props, prebuilt })
    }

    /// `<stem>.<arch>.elf` next to the source, falling back to `<stem>.elf`.
    fn prebuilt_binary(&self, source: &Path) -> Option<PathBuf> {
        let stem = source.file_stem()?.to_string_lossy();
        [format!("{stem}.{}.elf", self.arch), format!("{stem}.elf")]
            .into_iter()
            .map(|name| source.with_file_name(name))
            .find(|candidate| candidate.is_file())
    }
}

/// Lazy sequence of fixtures, in file name order.
pub struct Fixtures<'a> {
    loader: &'a FixtureLoader,
    walker: walkdir::FilterEntry<walkdir::IntoIter, fn(&walkdir::DirEntry) -> bool>,
}

impl Iterator for Fixtures<'_> {
    type Item = Result<FixtureFile, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    let path =
                        source.path().map_or_else(|| self.loader.root.clone(), Path::to_path_buf);
                    return Some(Err(DiscoveryError::Walk { path, source }));
                }
            };
            if !entry.file_type().is_file() || !is_fixture_source(entry.path()) {
                continue;
            }
            let id = relative_id(entry.path(), &self.loader.root);
            if !self.loader.is_selected(&id) {
                debug!(?id, "filtered out");
                continue;
            }
            return Some(self.loader.load(entry.path(), id));
        }
    }
}

fn keep_entry(entry: &walkdir::DirEntry) -> bool {
    entry.depth() == 0 || !is_temporary_name(entry.file_name())
}

fn is_fixture_source(path: &Path) -> bool {
    path.extension() == Some(OsStr::new("c"))
}

/// `.`, `#`, and `~` are common temp-file prefixes.
fn is_temporary_name(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    [".", "#", "~"].iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "refine/pos/malloc-free/test.c", "int test(void) { return 0; }\n");
        write(root, "refine/neg/null-deref/test.c", "// expect-defect: null\nint test(void);\n");
        write(root, "refine/neg/null-deref/README.md", "not a fixture\n");
        write(root, "prop/in-text/pos/data_if/test.c", "int test(int x) { return x; }\n");
        write(root, "prop/in-text/pos/data_if/test.x64.elf", "");
        write(root, "prop/in-text/pos/data_if/.#test.c", "editor lock\n");
        write(root, "refine/pos/.hidden/test.c", "int test(void) { return 0; }\n");
        dir
    }

    fn ids(loader: &FixtureLoader) -> Vec<String> {
        loader.fixtures().map(|f| f.unwrap().id).collect()
    }

    #[test]
    fn check_discovery_order_and_skips() {
        let dir = fixture_tree();
        let loader = FixtureLoader::new(dir.path());
        assert_eq!(
            ids(&loader),
            vec![
                "prop/in-text/pos/data_if/test.c",
                "refine/neg/null-deref/test.c",
                "refine/pos/malloc-free/test.c",
            ]
        );
        // Restartable
        assert_eq!(ids(&loader).len(), 3);
    }

    #[test]
    fn check_fixture_contents() {
        let dir = fixture_tree();
        let loader = FixtureLoader::new(dir.path());
        let fixtures: Vec<_> = loader.fixtures().map(Result::unwrap).collect();
        assert_eq!(fixtures[0].category, Category::Pos);
        assert_eq!(
            fixtures[0].prebuilt,
            Some(dir.path().join("prop/in-text/pos/data_if/test.x64.elf"))
        );
        assert_eq!(fixtures[1].category, Category::Neg);
        assert_eq!(fixtures[1].props.expected_defect.as_deref(), Some("null"));
        assert!(fixtures[2].prebuilt.is_none());
    }

    #[test]
    fn check_filters() {
        let dir = fixture_tree();
        let mut loader = FixtureLoader::new(dir.path());
        loader.filters = vec!["malloc".into()];
        assert_eq!(ids(&loader), vec!["refine/pos/malloc-free/test.c"]);
        loader.exact = true;
        assert!(ids(&loader).is_empty());
        loader.filters = vec!["refine/neg/null-deref/test.c".into()];
        assert_eq!(ids(&loader), vec!["refine/neg/null-deref/test.c"]);
    }

    #[test]
    fn check_prebuilt_fallback() {
        let dir = fixture_tree();
        write(dir.path(), "refine/pos/malloc-free/test.elf", "");
        let mut loader = FixtureLoader::new(dir.path());
        loader.filters = vec!["malloc".into()];
        loader.arch = "arm".into();
        let fixture = loader.fixtures().next().unwrap().unwrap();
        assert_eq!(fixture.prebuilt, Some(dir.path().join("refine/pos/malloc-free/test.elf")));
    }

    #[test]
    fn check_discovery_errors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "misc/test.c", "int test(void);\n");
        write(dir.path(), "pos/bad/test.c", "// check: test() ==\n");
        let loader = FixtureLoader::new(dir.path());
        let results: Vec<_> = loader.fixtures().collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0],
            Err(DiscoveryError::Uncategorized { path }) if path.ends_with("misc/test.c")
        ));
        assert!(matches!(&results[1], Err(DiscoveryError::BadDirective { line: 1, .. })));
    }

    #[test]
    fn check_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FixtureLoader::new(&dir.path().join("missing"));
        let results: Vec<_> = loader.fixtures().collect();
        assert!(matches!(results.as_slice(), [Err(DiscoveryError::Walk { .. })]));
    }
}
