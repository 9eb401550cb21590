#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Output;

use assert_cmd::Command;

/// Path of the built executable, for rule scripts that invoke it recursively.
pub fn remake_bin() -> PathBuf {
  assert_cmd::cargo::cargo_bin("remake")
}

/// A command running the executable in `dir` with a clean environment, so a test run never
/// attaches to an outer build server.
pub fn remake(dir: &Path) -> Command {
  let mut command = Command::cargo_bin("remake").expect("remake binary");
  command
    .current_dir(dir)
    .env_remove("REMAKE_SOCKET")
    .env_remove("REMAKE_JOB_ID");
  command
}

pub fn stdout_of(output: &Output) -> String {
  String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

/// The number of "Building …" lines a run printed.
pub fn building_count(output: &Output) -> usize {
  stdout_of(output).lines().filter(|l| l.starts_with("Building")).count()
}

pub fn built(output: &Output, target: &str) -> bool {
  stdout_of(output).lines().any(|l| {
    l.strip_prefix("Building ")
      .map(|rest| rest.split(' ').any(|t| t == target))
      .unwrap_or(false)
  })
}
