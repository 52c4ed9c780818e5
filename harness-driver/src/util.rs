// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Helpers shared by the harness stages.
//!
//! The `warning` and `error` functions must be used for user-facing diagnostics so that every
//! message carries the same styled tag. Use `tracing` for everything that is only useful when
//! debugging the harness itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Turn a fixture id into a relative directory usable under the build directory.
/// `refine/pos/malloc-free/test.c` becomes `refine/pos/malloc-free/test`.
pub fn fixture_build_subdir(id: &str) -> PathBuf {
    let mut dir = PathBuf::new();
    for segment in id.split('/').filter(|s| !s.is_empty() && *s != "." && *s != "..") {
        dir.push(segment);
    }
    dir.with_extension("")
}

/// Express `path` relative to `root` with `/` separators, the form used for fixture ids.
pub fn relative_id(path: &Path, root: &Path) -> String {
    let relative = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
    let segments: Vec<String> =
        relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    segments.join("/")
}

/// Render a Command as a string, to log it.
pub fn render_command(cmd: &Command) -> OsString {
    let mut rendered = OsString::new();

    for (key, value) in cmd.get_envs() {
        if let Some(value) = value {
            rendered.push(key);
            rendered.push("=\"");
            rendered.push(value);
            rendered.push("\" ");
        }
    }

    rendered.push(cmd.get_program());

    for arg in cmd.get_args() {
        rendered.push(" ");
        if arg.to_string_lossy().contains(' ') {
            rendered.push("\"");
            rendered.push(arg);
            rendered.push("\"");
        } else {
            rendered.push(arg);
        }
    }

    rendered
}

/// Print a warning message. This will add a "warning:" tag before the message and style
/// accordingly.
pub fn warning(msg: &str) {
    let warning = console::style("warning:").bold().yellow();
    let msg_fmt = console::style(msg).bold();
    eprintln!("{warning} {msg_fmt}")
}

/// Print an error message. This will add an "error:" tag before the message and style accordingly.
pub fn error(msg: &str) {
    let error = console::style("error:").bold().red();
    let msg_fmt = console::style(msg).bold();
    eprintln!("{error} {msg_fmt}")
}

/// Print an info message. This will print the stage in bold green and the rest in regular style.
pub fn info_operation(op: &str, msg: &str) {
    let op_fmt = console::style(op).bold().green();
    let msg_fmt = console::style(msg);
    println!("{op_fmt} {msg_fmt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_fixture_build_subdir() {
        assert_eq!(
            fixture_build_subdir("refine/pos/malloc-free/test.c"),
            PathBuf::from("refine/pos/malloc-free/test")
        );
        // Nothing may escape the build directory.
        assert_eq!(fixture_build_subdir("../pos/../x.c"), PathBuf::from("pos/x"));
    }

    #[test]
    fn check_relative_id() {
        let root = Path::new("/fixtures");
        assert_eq!(
            relative_id(Path::new("/fixtures/prop/in-text/pos/data_if/test.c"), root),
            "prop/in-text/pos/data_if/test.c"
        );
    }

    #[test]
    fn check_render_command() {
        let mut c1 = Command::new("grease");
        c1.arg("--symbol").arg("test");
        assert_eq!(render_command(&c1), OsString::from("grease --symbol test"));
        c1.arg("/build dir/test.elf");
        assert_eq!(
            render_command(&c1),
            OsString::from("grease --symbol test \"/build dir/test.elf\"")
        );
        c1.env("GREASE_LOG", "debug");
        assert_eq!(
            render_command(&c1),
            OsString::from("GREASE_LOG=\"debug\" grease --symbol test \"/build dir/test.elf\"")
        );
    }
}
