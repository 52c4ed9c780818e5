// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;
use harness_metadata::{Category, Fixture, Outcome, Stage, Verdict};
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::c_decls::parse_translation_unit;
use crate::concrete::{CheckError, run_check};
use crate::discovery::{DiscoveryError, FixtureFile, FixtureLoader};
use crate::normalize::normalize;
use crate::session::HarnessSession;
use crate::util::{info_operation, relative_id};
use crate::verdict::check_verdict;

/// A HarnessRunner is responsible for checking all fixtures a loader finds.
///
/// This struct is basically just a nicer way of passing many arguments to
/// [`Self::check_all_fixtures`]
pub(crate) struct HarnessRunner<'sess> {
    /// The underlying session
    pub sess: &'sess HarnessSession,
    /// Where the fixtures come from
    pub loader: &'sess FixtureLoader,
}

/// The verdict on a single fixture, and how long it took to reach it.
#[derive(Debug, Clone)]
pub(crate) struct FixtureResult {
    pub verdict: Verdict,
    pub runtime: Duration,
}

/// The results of checking all fixtures, sorted by fixture id.
#[derive(Debug, Default)]
pub(crate) struct HarnessResults {
    pub results: Vec<FixtureResult>,
}

impl HarnessResults {
    pub fn verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.results.iter().map(|r| &r.verdict)
    }

    pub fn passed(&self) -> usize {
        self.verdicts().filter(|v| v.outcome == Outcome::Passed).count()
    }

    pub fn ignored(&self) -> usize {
        self.verdicts().filter(|v| v.is_ignored()).count()
    }

    pub fn failed(&self) -> usize {
        self.verdicts().filter(|v| matches!(v.outcome, Outcome::Failed { .. })).count()
    }

    pub fn errors(&self) -> usize {
        self.verdicts().filter(|v| v.is_error()).count()
    }

    /// Ignored fixtures count as successes.
    pub fn all_succeeded(&self) -> bool {
        self.verdicts().all(|v| v.success)
    }
}

impl<'sess> HarnessRunner<'sess> {
    /// Walk the fixture tree once and check every fixture on the session's thread pool.
    pub(crate) fn check_all_fixtures(&self) -> Result<HarnessResults> {
        let loaded: Vec<Result<FixtureFile, DiscoveryError>> = self.loader.fixtures().collect();
        debug!(fixtures = loaded.len(), jobs = ?self.sess.args.jobs(), "check_all_fixtures");

        // Zero lets rayon pick one thread per core.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.sess.args.jobs().unwrap_or(0))
            .build()?;
        let mut results: Vec<FixtureResult> = pool.install(|| {
            loaded.into_par_iter().map(|fixture| self.check_one(fixture)).collect()
        });
        results.sort_by(|a, b| a.verdict.fixture.cmp(&b.verdict.fixture));
        Ok(HarnessResults { results })
    }

    fn check_one(&self, loaded: Result<FixtureFile, DiscoveryError>) -> FixtureResult {
        let start = Instant::now();
        let verdict = match loaded {
            Ok(file) => {
                let (id, category) = (file.id.clone(), file.category);
                guarded(&id, category, || self.sess.check_fixture(file))
            }
            Err(err) => {
                let id = relative_id(err.path(), &self.loader.root);
                Verdict::error(&id, None, Stage::Discovery, err.to_string())
            }
        };
        FixtureResult { verdict, runtime: start.elapsed() }
    }
}

/// Run `check` for one fixture, turning a panic into an error verdict for that fixture alone.
fn guarded(id: &str, category: Category, check: impl FnOnce() -> Verdict) -> Verdict {
    catch_unwind(AssertUnwindSafe(check)).unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        debug!(fixture = %id, %message, "fixture check panicked");
        Verdict::error(id, Some(category), Stage::Concrete, format!("internal error: {message}"))
    })
}

impl HarnessSession {
    /// Take one fixture through the whole pipeline. Never fails: every problem becomes part of
    /// the verdict.
    pub(crate) fn check_fixture(&self, file: FixtureFile) -> Verdict {
        let (id, category) = (file.id.clone(), file.category);
        if self.args.common_args.verbose {
            info_operation("Checking", &id);
        }
        let fixture = match normalize(file) {
            Ok(fixture) => fixture,
            Err(err) => {
                return Verdict::error(&id, Some(category), Stage::Normalize, err.to_string());
            }
        };
        if let Some(reason) = &fixture.props.ignore {
            return Verdict::ignored(&id, category, reason);
        }

        let checks = fixture.props.checks.len();
        if !self.args.skip_concrete && checks > 0 {
            if let Some(verdict) = self.run_concrete_checks(&fixture) {
                return verdict;
            }
        }
        if self.args.concrete_only {
            return Verdict::passed(&id, category, format!("{checks} concrete checks passed"));
        }

        let binary = match self.compile_fixture(&fixture) {
            Ok(binary) => binary,
            Err(err) => return Verdict::error(&id, Some(category), Stage::Compile, err.to_string()),
        };
        let report = match self.run_engine(&fixture, &binary) {
            Ok(report) => report,
            Err(err) => return Verdict::error(&id, Some(category), Stage::Engine, err.to_string()),
        };
        match check_verdict(&fixture, &report) {
            Ok(()) => Verdict::passed(&id, category, report.to_string()),
            Err(failure) => Verdict::failed(
                &id,
                category,
                Stage::Check,
                failure.expected.to_string(),
                failure.actual.to_string(),
            ),
        }
    }

    /// Evaluate the fixture's `check:` directives. Returns the verdict of the first one that
    /// does not hold.
    fn run_concrete_checks(&self, fixture: &Fixture) -> Option<Verdict> {
        let category: Category = fixture.category;
        let unit = match parse_translation_unit(&fixture.source) {
            Ok(unit) => unit,
            Err(err) => {
                let message = format!("cannot parse fixture: {err}");
                return Some(Verdict::error(&fixture.id, Some(category), Stage::Concrete, message));
            }
        };
        for check in &fixture.props.checks {
            match run_check(&unit, check) {
                Ok(()) => {
                    debug!(fixture = %fixture.id, call = %check.call(), "concrete check held")
                }
                Err(CheckError::Mismatch { line, call, expected, actual }) => {
                    return Some(Verdict::failed(
                        &fixture.id,
                        category,
                        Stage::Concrete,
                        format!("`{call}` {expected} (line {line})"),
                        actual,
                    ));
                }
                Err(err @ CheckError::Eval { .. }) => {
                    let message = err.to_string();
                    let stage = Stage::Concrete;
                    return Some(Verdict::error(&fixture.id, Some(category), stage, message));
                }
            }
        }
        None
    }
}
