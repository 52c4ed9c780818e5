// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use toml::Value;
use toml::value::Table;

/// The configuration file looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "grease-harness.toml";

/// Join the arguments passed on the command line with the ones found in the configuration file.
/// Configuration flags come first so that the user's own flags override them.
/// `list` takes none of the run flags a configuration file holds, so it is left alone.
pub fn join_args(input_args: Vec<OsString>) -> Result<Vec<OsString>> {
    if input_args.get(1).is_some_and(|arg| arg == "list") {
        return Ok(input_args);
    }
    let Some(config) = config_path(&input_args) else {
        return Ok(input_args);
    };
    let data = std::fs::read_to_string(&config)
        .with_context(|| format!("Failed to read configuration file `{}`", config.display()))?;
    let config_args = toml_to_args(&data)
        .with_context(|| format!("Invalid configuration file `{}`", config.display()))?;
    tracing::debug!(config=%config.display(), ?config_args, "join_args");
    Ok(merge_args(input_args, config_args))
}

/// Insert the configuration arguments right after the executable name.
fn merge_args(input_args: Vec<OsString>, config_args: Vec<OsString>) -> Vec<OsString> {
    let mut args = input_args;
    let tail = args.split_off(1.min(args.len()));
    args.extend(config_args);
    args.extend(tail);
    args
}

/// Find the configuration file: an explicit `--config <path>` / `--config=<path>`, else
/// `grease-harness.toml` in the working directory when it exists.
fn config_path(input_args: &[OsString]) -> Option<PathBuf> {
    let mut args = input_args.iter().skip(1);
    while let Some(arg) = args.next() {
        let arg = arg.to_string_lossy();
        if arg == "--" {
            break;
        }
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    let default = Path::new(CONFIG_FILE);
    default.is_file().then(|| default.to_path_buf())
}

/// Parse a config toml string and extract the harness arguments we should try injecting
fn toml_to_args(tomldata: &str) -> Result<Vec<OsString>> {
    let config = Value::Table(toml::from_str::<Table>(tomldata)?);
    // Produce a stable ordering of flags for a given input.
    let mut map: BTreeMap<String, Value> = BTreeMap::new();
    let tables = ["harness.flags", "flags"];

    for table in tables {
        if let Some(val) = get_table(&config, table) {
            map.extend(val.iter().map(|(x, y)| (x.to_owned(), y.to_owned())));
        }
    }

    let mut args = Vec::new();
    for (flag, value) in map {
        if flag == "config" {
            bail!("`config` cannot be set from a configuration file");
        }
        insert_arg_from_toml(&flag, &value, &mut args)?;
    }
    Ok(args)
}

/// Translates one toml entry (flag, value) into arguments and inserts it into `args`
fn insert_arg_from_toml(flag: &str, value: &Value, args: &mut Vec<OsString>) -> Result<()> {
    match value {
        Value::Boolean(b) => {
            if *b {
                args.push(format!("--{flag}").into());
            } else if flag.starts_with("no-") {
                bail!("{flag} disables a disabling flag. Just enable the flag instead.");
            } else {
                args.push(format!("--no-{flag}").into());
            }
        }
        Value::Array(a) => {
            // Repeated flags: `cc-flag = ["-O1", "-g"]` is `--cc-flag -O1 --cc-flag -g`.
            for arg in a {
                if let Some(arg) = arg.as_str() {
                    args.push(format!("--{flag}").into());
                    args.push(arg.into());
                } else {
                    bail!("flag {flag} contains non-string values");
                }
            }
        }
        Value::String(s) => {
            args.push(format!("--{flag}").into());
            args.push(s.into());
        }
        Value::Integer(i) => {
            args.push(format!("--{flag}").into());
            args.push(i.to_string().into());
        }
        _ => {
            bail!("Unknown key type {flag}");
        }
    }
    Ok(())
}

/// Take 'a.b.c' and turn it into 'start['a']['b']['c']' reliably, and interpret the result as a
/// table
fn get_table<'a>(start: &'a Value, table: &str) -> Option<&'a Table> {
    let mut current = start;
    for key in table.split('.') {
        current = current.get(key)?;
    }
    current.as_table()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn check_toml_parsing() {
        let a = "[harness]
                 flags = { use-prebuilt = true, timeout = \"30s\", \
                           cc-flag = [\"-O1\", \"-g\"], jobs = 4 }";
        let b = toml_to_args(a).unwrap();
        // btree ordering
        assert_eq!(
            b,
            x(&[
                "--cc-flag",
                "-O1",
                "--cc-flag",
                "-g",
                "--jobs",
                "4",
                "--timeout",
                "30s",
                "--use-prebuilt"
            ])
        );
    }

    #[test]
    fn check_top_level_flags_table() {
        let b = toml_to_args("[flags]\nengine = \"/opt/grease/bin/grease\"").unwrap();
        assert_eq!(b, x(&["--engine", "/opt/grease/bin/grease"]));
    }

    #[test]
    fn check_bad_values() {
        assert!(toml_to_args("[flags]\nno-default-cc-flags = false").is_err());
        assert!(toml_to_args("[flags]\ncc-flag = [1]").is_err());
        assert!(toml_to_args("[flags]\nconfig = \"other.toml\"").is_err());
        assert!(toml_to_args("[flags").is_err());
    }

    #[test]
    fn check_merge_args() {
        let merged = merge_args(x(&["grease-harness", "tests", "data_if"]), x(&["-j", "2"]));
        assert_eq!(merged, x(&["grease-harness", "-j", "2", "tests", "data_if"]));
        assert_eq!(merge_args(x(&[]), x(&["-q"])), x(&["-q"]));
    }

    #[test]
    fn check_explicit_config_path() {
        assert_eq!(
            config_path(&x(&["grease-harness", "--config", "ci.toml", "tests"])),
            Some(PathBuf::from("ci.toml"))
        );
        assert_eq!(
            config_path(&x(&["grease-harness", "--config=ci.toml"])),
            Some(PathBuf::from("ci.toml"))
        );
    }

    #[test]
    fn check_join_args_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ci.toml");
        std::fs::write(&config, "[harness.flags]\nskip-concrete = true\n").unwrap();
        let config = config.to_string_lossy().into_owned();
        let joined =
            join_args(x(&["grease-harness", "--config", &config, "tests"])).unwrap();
        assert_eq!(
            joined,
            x(&["grease-harness", "--skip-concrete", "--config", &config, "tests"])
        );
        let list = x(&["grease-harness", "list", "--config", &config, "tests"]);
        assert_eq!(join_args(list.clone()).unwrap(), list);
    }
}
