// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use harness_metadata::Fixture;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::call_engine::{EngineError, stderr_excerpt};
use crate::session::HarnessSession;

impl HarnessSession {
    /// Produce the binary the engine analyzes: the fixture's prebuilt binary when the user asked
    /// for it and one exists, otherwise the fixture compiled into its build directory.
    pub fn compile_fixture(&self, fixture: &Fixture) -> Result<PathBuf, EngineError> {
        if self.args.use_prebuilt {
            if let Some(prebuilt) = &fixture.prebuilt {
                debug!(
                    fixture = %fixture.id,
                    prebuilt = %prebuilt.display(),
                    "using prebuilt binary"
                );
                return Ok(prebuilt.clone());
            }
        }
        let Some(cc) = &self.cc else {
            return Err(EngineError::Compile {
                message: format!(
                    "no prebuilt binary and no C compiler `{}` available",
                    self.args.cc.display()
                ),
            });
        };

        let dir = self.fixture_dir(&fixture.id);
        std::fs::create_dir_all(&dir).map_err(|err| EngineError::Compile {
            message: format!("cannot create `{}`: {err}", dir.display()),
        })?;
        let output = dir.join(binary_name(&fixture.source_path));

        let mut cmd = Command::new(cc);
        cmd.args(self.cc_flags(fixture)).arg("-o").arg(&output).arg(&fixture.source_path);
        let program = cmd.get_program().to_string_lossy().into_owned();
        let compiled = self.run_with_timeout(cmd).map_err(|err| match err {
            EngineError::Timeout { timeout } => {
                EngineError::Compile { message: format!("`{program}` timed out after {timeout}") }
            }
            EngineError::Invocation { message } | EngineError::Compile { message } => {
                EngineError::Compile { message }
            }
        })?;
        if !compiled.status.success() {
            let excerpt = stderr_excerpt(&compiled.stderr);
            let message = format!("`{program}` exited with {}{excerpt}", compiled.status);
            return Err(EngineError::Compile { message });
        }
        debug!(fixture = %fixture.id, runtime = ?compiled.runtime, "compiled");
        self.record_temporary(&output);
        Ok(output)
    }

    /// The default flags (unless disabled), the `--cc-flag`s, then the fixture's own flags.
    pub fn cc_flags(&self, fixture: &Fixture) -> Vec<OsString> {
        let mut args: Vec<OsString> =
            self.args.cc_flags().into_iter().map(OsString::from).collect();
        args.extend(fixture.props.cc_flags.iter().map(OsString::from));
        args
    }
}

/// `test.c` is compiled to `test.elf`.
fn binary_name(source: &Path) -> PathBuf {
    let stem = source.file_stem().unwrap_or(source.as_os_str());
    Path::new(stem).with_extension("elf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_binary_name() {
        let source = Path::new("refine/pos/malloc-free/test.c");
        assert_eq!(binary_name(source), PathBuf::from("test.elf"));
        assert_eq!(binary_name(Path::new("a.b.c")), PathBuf::from("a.b.elf"));
    }
}
