// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Module that defines the harness command line interface, including all subcommands.

pub mod common;

use self::common::*;
use clap::ValueEnum;
use clap::error::{Error, ErrorKind};
use regex::Regex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Trait used to perform extra validation after parsing.
pub trait ValidateArgs {
    /// Perform post-parsing validation but do not abort.
    fn validate(&self) -> Result<(), Error>;
}

/// Validate a set of arguments and ensure they are in a valid state.
/// This method will abort execution with a user friendly error message if the state is invalid.
pub fn check_is_valid<T>(command: &T)
where
    T: clap::Parser + ValidateArgs,
{
    if let Err(e) = command.validate() {
        e.format(&mut T::command()).exit()
    }
}

/// Flags passed to the C compiler unless `--no-default-cc-flags` is given.
pub const DEFAULT_CC_FLAGS: &[&str] = &["-fno-stack-protector", "-nostdlib", "-no-pie"];

#[derive(Debug, clap::Parser)]
#[command(
    version,
    name = "grease-harness",
    about = "Run C fixtures through an external analysis engine and check its verdicts against the \
             pos/neg category encoded in each fixture's path",
    args_override_self = true,
    subcommand_negates_reqs = true,
    subcommand_precedence_over_arg = true,
    args_conflicts_with_subcommands = true
)]
pub struct StandaloneArgs {
    /// Directory to search for fixtures
    #[arg(required = true)]
    pub root: Option<PathBuf>,

    /// Only run fixtures whose id contains one of these filters
    pub filters: Vec<String>,

    #[command(flatten)]
    pub run_opts: RunArgs,

    #[command(subcommand)]
    pub command: Option<StandaloneSubcommand>,
}

/// When no subcommand is provided, there is an implied run subcommand.
#[derive(Debug, clap::Subcommand)]
pub enum StandaloneSubcommand {
    /// List the discovered fixtures and their symbol facts.
    List(Box<ListArgs>),
}

/// Arguments that select fixtures. Shared by running and listing.
#[derive(Debug, Clone, clap::Args)]
pub struct SelectionArgs {
    /// When specified, filters only match the exact fixture id
    #[arg(long)]
    pub exact: bool,

    /// Architecture tag used to find prebuilt binaries named `<stem>.<arch>.elf`
    #[arg(long, default_value = "x64")]
    pub arch: String,
}

// Arguments for running fixtures. This gets put into the session, whereas anything above is
// "local" to main's control flow.
#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    /// The analysis engine executable
    #[arg(long, default_value = "grease")]
    pub engine: PathBuf,

    /// Extra argument passed to the engine before any fixture argument. May be repeated.
    #[arg(long = "engine-arg", num_args(1), allow_hyphen_values = true, value_name = "ARG")]
    pub engine_args: Vec<OsString>,

    /// Flag the engine uses to receive the entry symbol
    #[arg(long, default_value = "--symbol", allow_hyphen_values = true)]
    pub entry_flag: String,

    /// Flag passed once per overridden standard library function, followed by its name.
    /// Nothing is passed when unset.
    #[arg(long, allow_hyphen_values = true)]
    pub override_flag: Option<String>,

    /// Flag used to pass the path of the fixture's symbol facts JSON file. Nothing is passed
    /// when unset.
    #[arg(long, allow_hyphen_values = true)]
    pub facts_flag: Option<String>,

    /// Regular expression matching an engine output line that reports no defect
    #[arg(long, default_value = "^All goals passed")]
    pub pass_pattern: String,

    /// Regular expression matching an engine output line that reports a defect
    #[arg(long, default_value = "^(Likely|Possible) bug")]
    pub defect_pattern: String,

    /// The C compiler used to build fixtures
    #[arg(long, default_value = "cc")]
    pub cc: PathBuf,

    /// Extra flag for the C compiler. May be repeated.
    #[arg(long = "cc-flag", num_args(1), allow_hyphen_values = true, value_name = "FLAG")]
    pub cc_flags: Vec<String>,

    /// Do not pass the default compiler flags (-fno-stack-protector -nostdlib -no-pie)
    #[arg(long)]
    pub no_default_cc_flags: bool,

    /// Use a binary shipped next to the fixture instead of compiling it, when there is one
    #[arg(long)]
    pub use_prebuilt: bool,

    /// Time limit for each engine invocation, e.g. `90`, `90s`, `5m` or `1h`
    #[arg(long, default_value = "5m")]
    pub timeout: Timeout,

    /// Number of parallel jobs, defaults to 1. `-j` alone uses every core.
    #[arg(short, long)]
    pub jobs: Option<Option<usize>>,

    /// Directory for all generated artifacts. A temporary directory is used when unset.
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Keep the build directory and generated files
    #[arg(long, hide_short_help = true)]
    pub keep_temps: bool,

    /// Only evaluate the fixtures' `check:` directives; do not compile or run the engine
    #[arg(long, conflicts_with = "skip_concrete")]
    pub concrete_only: bool,

    /// Do not evaluate the fixtures' `check:` directives
    #[arg(long)]
    pub skip_concrete: bool,

    /// Write all verdicts to this file as JSON
    #[arg(long)]
    pub json_report: Option<PathBuf>,

    /// Read default flags from this TOML file instead of `grease-harness.toml`
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub common_args: CommonArgs,
}

impl RunArgs {
    /// Computes how many threads should be used to run fixtures.
    pub fn jobs(&self) -> Option<usize> {
        match self.jobs {
            None => Some(1),          // no argument, default 1
            Some(None) => None,       // -j
            Some(Some(x)) => Some(x), // -j=x
        }
    }

    /// All compiler flags in command line order, defaults first.
    pub fn cc_flags(&self) -> Vec<String> {
        let defaults = if self.no_default_cc_flags { &[][..] } else { DEFAULT_CC_FLAGS };
        defaults.iter().map(|f| f.to_string()).chain(self.cc_flags.iter().cloned()).collect()
    }
}

impl ValidateArgs for RunArgs {
    fn validate(&self) -> Result<(), Error> {
        self.common_args.validate()?;
        if self.jobs == Some(Some(0)) {
            return Err(Error::raw(
                ErrorKind::InvalidValue,
                "The number of jobs must be at least 1.",
            ));
        }
        for (flag, pattern) in
            [("--pass-pattern", &self.pass_pattern), ("--defect-pattern", &self.defect_pattern)]
        {
            if let Err(err) = Regex::new(pattern) {
                return Err(Error::raw(
                    ErrorKind::ValueValidation,
                    format!("Invalid regular expression for `{flag}`: {err}"),
                ));
            }
        }
        Ok(())
    }
}

impl ValidateArgs for StandaloneArgs {
    fn validate(&self) -> Result<(), Error> {
        match &self.command {
            Some(StandaloneSubcommand::List(list)) => list.validate(),
            None => self.run_opts.validate(),
        }
    }
}

#[derive(Debug, clap::Args)]
pub struct ListArgs {
    /// Directory to search for fixtures
    pub root: PathBuf,

    /// Only list fixtures whose id contains one of these filters
    pub filters: Vec<String>,

    /// Output format
    #[arg(long, default_value = "pretty", ignore_case = true, value_enum)]
    pub format: ListFormat,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub common_args: CommonArgs,
}

impl ValidateArgs for ListArgs {
    fn validate(&self) -> Result<(), Error> {
        self.common_args.validate()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Pretty,
    Json,
}

/// A time limit given as plain seconds or with an `s`, `m` or `h` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(Duration);

impl Timeout {
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout(duration)
    }
}

impl FromStr for Timeout {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (number, unit) = match value.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], Some(c)),
            _ => (value, None),
        };
        let invalid =
            || format!("invalid timeout `{value}`: expected e.g. `90`, `90s`, `5m` or `1h`");
        let amount: u64 = number.parse().map_err(|_| invalid())?;
        let seconds = match unit {
            None | Some('s') => Some(amount),
            Some('m') => amount.checked_mul(60),
            Some('h') => amount.checked_mul(60 * 60),
            Some(other) => return Err(format!("invalid timeout unit `{other}` in `{value}`")),
        }
        .ok_or_else(invalid)?;
        if seconds == 0 {
            return Err("the timeout must be positive".to_string());
        }
        Ok(Timeout(Duration::from_secs(seconds)))
    }
}

impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}
