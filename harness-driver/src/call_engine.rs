// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use harness_metadata::{EngineReport, Fixture};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

use crate::args::Timeout;
use crate::engine_output_parser::parse_engine_output;
use crate::session::HarnessSession;
use crate::util::render_command;

/// The harness could not obtain a verdict. Distinct from the engine disagreeing with the
/// fixture, which is a [`crate::verdict::TestFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine invocation failed: {message}")]
    Invocation { message: String },
    #[error("engine timed out after {timeout}")]
    Timeout { timeout: Timeout },
    #[error("compilation failed: {message}")]
    Compile { message: String },
}

/// What one engine process left behind.
#[derive(Debug)]
pub struct EngineOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub runtime: Duration,
}

impl HarnessSession {
    /// Run the engine on `binary` and recover its verdict.
    pub fn run_engine(
        &self,
        fixture: &Fixture,
        binary: &Path,
    ) -> Result<EngineReport, EngineError> {
        let facts = self.write_facts(fixture)?;
        let mut cmd = Command::new(&self.engine);
        cmd.args(self.engine_args(fixture, binary, &facts));

        let output = self.run_with_timeout(cmd)?;
        debug!(
            fixture = %fixture.id,
            status = %output.status,
            runtime = ?output.runtime,
            "engine finished"
        );
        match parse_engine_output(&output.stdout, &output.stderr, &self.patterns) {
            Some(report) => Ok(report),
            None if output.status.success() => Err(EngineError::Invocation {
                message: "no verdict found in the engine output".to_string(),
            }),
            None => Err(EngineError::Invocation {
                message: format!(
                    "engine exited with {} without a verdict{}",
                    output.status,
                    stderr_excerpt(&output.stderr)
                ),
            }),
        }
    }

    /// `<engine-args> <entry-flag> <entry> [<override-flag> <fn>]... [<facts-flag> <facts>]
    /// <fixture engine-flags> <binary>`
    pub fn engine_args(&self, fixture: &Fixture, binary: &Path, facts: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.engine_args.clone();

        args.push(self.args.entry_flag.clone().into());
        args.push(fixture.entry().into());

        if let Some(flag) = &self.args.override_flag {
            for function in fixture.facts.overrides.overridden() {
                args.push(flag.into());
                args.push(function.as_ref().into());
            }
        }

        if let Some(flag) = &self.args.facts_flag {
            args.push(flag.into());
            args.push(facts.as_os_str().to_owned());
        }

        args.extend(fixture.props.engine_flags.iter().map(OsString::from));
        args.push(binary.as_os_str().to_owned());
        args
    }

    /// Serialize the fixture's symbol facts next to its build artifacts.
    fn write_facts(&self, fixture: &Fixture) -> Result<PathBuf, EngineError> {
        let invocation = |message: String| EngineError::Invocation { message };
        let dir = self.fixture_dir(&fixture.id);
        std::fs::create_dir_all(&dir)
            .map_err(|err| invocation(format!("cannot create `{}`: {err}", dir.display())))?;
        let path = dir.join("facts.json");
        let json = serde_json::to_string_pretty(&fixture.facts)
            .map_err(|err| invocation(format!("cannot serialize symbol facts: {err}")))?;
        std::fs::write(&path, json)
            .map_err(|err| invocation(format!("cannot write `{}`: {err}", path.display())))?;
        self.record_temporary(&path);
        Ok(path)
    }

    /// Run `cmd` to completion, killing it once the session timeout expires. Output is drained
    /// on separate threads so a chatty child never blocks on a full pipe.
    pub fn run_with_timeout(&self, mut cmd: Command) -> Result<EngineOutput, EngineError> {
        if self.args.common_args.verbose {
            println!("[grease-harness] {}", render_command(&cmd).to_string_lossy());
        }
        let timeout = self.args.timeout;
        let start = Instant::now();
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| EngineError::Invocation {
                message: format!("cannot start `{}`: {err}", cmd.get_program().to_string_lossy()),
            })?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let program = cmd.get_program().to_string_lossy().into_owned();
        let waited = child.wait_timeout(timeout.duration()).map_err(|err| {
            EngineError::Invocation { message: format!("cannot wait for `{program}`: {err}") }
        })?;
        let status = match waited {
            Some(status) => status,
            None => {
                trace!(pid = child.id(), %program, "killing child");
                // The process may have exited in the meantime.
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Timeout { timeout });
            }
        };

        Ok(EngineOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
            runtime: start.elapsed(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|h| h.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The last few lines of a child's stderr, for error messages.
pub(crate) fn stderr_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let tail = &lines[lines.len().saturating_sub(5)..];
    format!(":\n{}", tail.join("\n"))
}
