// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::args::RunArgs;
use crate::args::common::CommonArgs;
use crate::engine_output_parser::OutputPatterns;
use anyhow::{Context, Result, bail};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Environment variable used to control this session log tracing.
/// This is the same variable used to control `grease-harness` library log.
const LOG_ENV_VAR: &str = "GREASE_HARNESS_LOG";

/// Contains information about the execution environment and arguments that affect operations
pub struct HarnessSession {
    /// The common command-line arguments
    pub args: RunArgs,

    /// The location we found the analysis engine
    pub engine: PathBuf,
    /// The location we found the C compiler. Absent when nothing needs compiling.
    pub cc: Option<PathBuf>,

    /// How to recognize the engine's verdict
    pub patterns: OutputPatterns,

    /// Root of every generated artifact
    pub build_dir: PathBuf,
    /// Owns the build directory when the user did not provide one
    _temp_dir: Option<TempDir>,

    /// The temporary files we littered that need to be cleaned up at the end of execution.
    /// Fixtures are processed in parallel, so this is shared between workers.
    pub temporaries: Mutex<Vec<PathBuf>>,
}

impl HarnessSession {
    pub fn new(args: RunArgs) -> Result<Self> {
        let (engine, cc) = if args.concrete_only {
            (args.engine.clone(), None)
        } else {
            let engine = which::which(&args.engine).with_context(|| {
                format!("Cannot find the analysis engine `{}`", args.engine.display())
            })?;
            // The compiler is only mandatory when some fixture may need compiling.
            let cc = match which::which(&args.cc) {
                Ok(cc) => Some(cc),
                Err(err) if args.use_prebuilt => {
                    tracing::debug!(?err, "C compiler not found, relying on prebuilt binaries");
                    None
                }
                Err(err) => {
                    bail!("Cannot find the C compiler `{}`: {err}", args.cc.display())
                }
            };
            (engine, cc)
        };

        let patterns = OutputPatterns::new(&args)?;

        let (build_dir, temp_dir) = match &args.build_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create build directory `{}`", dir.display())
                })?;
                (dir.clone(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("grease-harness-")
                    .tempdir()
                    .context("Failed to create a temporary build directory")?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        // A kept temporary directory must survive the session.
        let temp_dir = match temp_dir {
            Some(dir) if args.keep_temps => {
                let _ = dir.keep();
                None
            }
            other => other,
        };
        tracing::debug!(engine=%engine.display(), build_dir=%build_dir.display(), "session");

        Ok(HarnessSession {
            args,
            engine,
            cc,
            patterns,
            build_dir,
            _temp_dir: temp_dir,
            temporaries: Mutex::new(vec![]),
        })
    }

    /// Remember a generated file that should be deleted at the end of the session.
    pub fn record_temporary(&self, path: &Path) {
        if let Ok(mut temporaries) = self.temporaries.lock() {
            temporaries.push(path.to_path_buf());
        }
    }

    /// Where the artifacts of one fixture go.
    pub fn fixture_dir(&self, fixture_id: &str) -> PathBuf {
        self.build_dir.join(crate::util::fixture_build_subdir(fixture_id))
    }
}

impl Drop for HarnessSession {
    fn drop(&mut self) {
        if !self.args.keep_temps {
            let temporaries = match self.temporaries.get_mut() {
                Ok(temporaries) => temporaries,
                Err(poisoned) => poisoned.into_inner(),
            };

            for file in temporaries.iter() {
                // If it fails, we don't care, skip it
                let _result = if file.is_dir() {
                    std::fs::remove_dir_all(file)
                } else {
                    std::fs::remove_file(file)
                };
            }
        }
    }
}

/// Initialize the logger using the GREASE_HARNESS_LOG environment variable and the verbosity flags.
pub fn init_logger(args: &CommonArgs) -> Result<()> {
    let default_level = if args.debug {
        LevelFilter::DEBUG
    } else if args.verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env()
        .with_context(|| format!("Invalid value for `{LOG_ENV_VAR}`"))?;

    if args.log_json {
        json_logs(filter)
    } else {
        fmt_logs(filter)
    }
}

/// Configure global logger to use a json logger.
fn json_logs(filter: EnvFilter) -> Result<()> {
    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    subscriber.try_init().context("Failed to initialize the logger")
}

/// Configure global logger to use human readable lines on stderr.
fn fmt_logs(filter: EnvFilter) -> Result<()> {
    let use_colors = std::io::stderr().is_terminal();
    let subscriber = Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(use_colors)
            .with_target(true),
    );
    subscriber.try_init().context("Failed to initialize the logger")
}
