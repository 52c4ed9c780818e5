// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Define arguments that should be common to all subcommands of the harness.
use crate::args::ValidateArgs;
use clap::error::{Error, ErrorKind};

/// Common arguments that we expect to be included in every subcommand.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonArgs {
    /// Produce full debug information
    #[arg(long)]
    pub debug: bool,
    /// Produces no output, just an exit code and requested artifacts; overrides --verbose
    #[arg(long, short)]
    pub quiet: bool,
    /// Output processing stages and commands, along with minor debug information
    #[arg(long, short, default_value_if("debug", "true", Some("true")))]
    pub verbose: bool,
    /// Emit log records as JSON lines instead of human readable text
    #[arg(long, hide_short_help = true)]
    pub log_json: bool,
}

impl ValidateArgs for CommonArgs {
    fn validate(&self) -> Result<(), Error> {
        if self.quiet && self.debug {
            return Err(Error::raw(
                ErrorKind::ArgumentConflict,
                "`--quiet` and `--debug` cannot be used together.",
            ));
        }
        Ok(())
    }
}
