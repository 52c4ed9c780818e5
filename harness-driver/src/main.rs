// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Result, bail};

use args::{StandaloneArgs, StandaloneSubcommand, check_is_valid};
use args_toml::join_args;

use crate::discovery::FixtureLoader;
use crate::session::HarnessSession;
use clap::Parser;
use tracing::debug;

mod args;
mod args_toml;
mod c_decls;
mod call_cc;
mod call_engine;
mod concrete;
mod discovery;
mod engine_output_parser;
mod harness_runner;
mod header;
mod list;
mod normalize;
mod report;
mod session;
mod util;
mod verdict;

/// The main function for the `grease-harness` driver.
fn main() -> ExitCode {
    match standalone_main() {
        Ok(true) => ExitCode::SUCCESS,
        // Failing fixtures were already reported.
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            // We are using the debug format for now to print the all the context.
            debug!(?error, "main_failure");
            util::error(&format!("{error:#}"));
            ExitCode::FAILURE
        }
    }
}

/// Parse the command line (with defaults from the config file) and dispatch.
fn standalone_main() -> Result<bool> {
    let input_args = join_args(std::env::args_os().collect())?;
    let args = StandaloneArgs::parse_from(input_args);
    check_is_valid(&args);

    if let Some(StandaloneSubcommand::List(list_args)) = args.command {
        session::init_logger(&list_args.common_args)?;
        check_root(&list_args.root)?;
        list::list_standalone(&list_args)?;
        return Ok(true);
    }

    session::init_logger(&args.run_opts.common_args)?;
    // `root` is required unless a subcommand is given.
    let Some(root) = args.root else { bail!("No fixture root given") };
    check_root(&root)?;
    let loader = FixtureLoader {
        root,
        filters: args.filters,
        exact: args.run_opts.selection.exact,
        arch: args.run_opts.selection.arch.clone(),
    };
    let session = HarnessSession::new(args.run_opts)?;
    run_fixtures(&loader, session)
}

/// Check every fixture the loader finds and report.
fn run_fixtures(loader: &FixtureLoader, session: HarnessSession) -> Result<bool> {
    debug!(root = %loader.root.display(), filters = ?loader.filters, "run_fixtures");
    let runner = harness_runner::HarnessRunner { sess: &session, loader };
    let results = runner.check_all_fixtures()?;
    if results.results.is_empty() {
        util::warning("no fixtures matched");
    }
    session.print_final_summary(&results)
}

/// An unreadable root aborts the run instead of failing every fixture.
fn check_root(root: &Path) -> Result<()> {
    match std::fs::read_dir(root) {
        Ok(_) => Ok(()),
        Err(err) => bail!("Cannot read fixture root `{}`: {err}", root.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_root_must_be_readable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_root(dir.path()).is_ok());
        let err = check_root(&dir.path().join("missing")).unwrap_err();
        assert!(err.to_string().starts_with("Cannot read fixture root"));
    }
}
