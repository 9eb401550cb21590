use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use remake::ipc;
use remake::path::BuildDir;
use remake::server::{Options, Server};
use remake::store;
use remake::tracker::writing::WritingTracker;

const USAGE: &str = "Usage: remake [options] [target] ...
Options
  -d                     Echo script commands.
  -d -d                  Print lots of debugging information.
  -f FILE                Read FILE as the rule file instead of Remakefile.
  -h, --help             Print this message and exit.
  -j[N], --jobs=[N]      Allow N jobs at once; infinite jobs with no arg.
  -k, --keep-going       Keep going when some targets cannot be made.
  -r                     Look up targets from the dependencies on standard input.
  -s, --silent, --quiet  Do not echo targets.
";

#[derive(Parser, Debug)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
  /// Echo script commands; given twice, print debugging information.
  #[arg(short = 'd', action = ArgAction::Count)]
  debug: u8,
  /// Rule file to load and keep up-to-date.
  #[arg(short = 'f', value_name = "FILE", default_value = "Remakefile")]
  file: String,
  /// Parallel jobs; without a value, or with a non-positive one, unbounded.
  #[arg(long = "jobs", value_name = "N", num_args = 0..=1, require_equals = true, default_missing_value = "0")]
  jobs: Option<i32>,
  /// Keep going when some targets cannot be made.
  #[arg(short = 'k', long = "keep-going")]
  keep_going: bool,
  /// Look up targets from the dependencies on standard input.
  #[arg(short = 'r')]
  indirect_targets: bool,
  /// Do not echo targets.
  #[arg(short = 's', long = "silent", visible_alias = "quiet")]
  silent: bool,
  #[arg(short = 'h', long = "help")]
  help: bool,
  /// Targets to build.
  targets: Vec<String>,
}

/// Behaves in two different ways: with `REMAKE_SOCKET` in the environment it connects to that
/// socket, sends its targets as a build request and exits with the server's verdict; otherwise
/// it becomes the server driving the whole build.
fn main() -> ExitCode {
  let args = normalize_jobs_args(std::env::args());
  let Ok(cli) = Cli::try_parse_from(args) else {
    eprint!("{USAGE}");
    return ExitCode::from(1);
  };
  if cli.help {
    eprint!("{USAGE}");
    return ExitCode::SUCCESS;
  }

  let dir = match BuildDir::from_cwd() {
    Ok(dir) => dir,
    Err(e) => {
      eprintln!("Failed to get working directory: {e}");
      return ExitCode::from(1);
    }
  };
  let mut targets: Vec<String> = cli.targets.iter().map(|t| dir.normalize(t)).collect();
  if cli.indirect_targets {
    targets = match indirect_targets(&dir, targets) {
      Ok(targets) => targets,
      Err(e) => {
        eprintln!("{e:#}");
        return ExitCode::from(1);
      }
    };
  }

  if let Ok(socket_path) = std::env::var(ipc::SOCKET_ENV) {
    return ExitCode::from(ipc::client_mode(&socket_path, &targets) as u8);
  }

  let options = Options {
    rule_file: cli.file,
    max_jobs: cli.jobs.unwrap_or(1),
    keep_going: cli.keep_going,
    echo_scripts: cli.debug >= 1,
  };
  let tracker = WritingTracker::new_stdout_writer(!cli.silent, cli.debug >= 2);
  match Server::run(options, targets, tracker) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::from(1),
    Err(e) => {
      eprintln!("{e:#}");
      ExitCode::from(1)
    }
  }
}

/// Rewrites `-j` and `-jN` into the `--jobs` form before parsing: the job count sticks to its
/// flag, so a bare `-j` never swallows the following target name. A negative count is a valid
/// spelling for an unbounded build.
fn normalize_jobs_args(args: impl Iterator<Item = String>) -> Vec<String> {
  args
    .map(|arg| {
      if let Some(count) = arg.strip_prefix("-j") {
        if count.is_empty() {
          return "--jobs".to_string();
        }
        let digits = count.strip_prefix('-').unwrap_or(count);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
          return format!("--jobs={count}");
        }
      }
      arg
    })
    .collect()
}

/// Handles `-r`: reads dependencies in the database grammar from standard input and replaces
/// the requested targets with the dependencies recorded for them. Without explicit targets, the
/// first parsed target names the default set.
fn indirect_targets(dir: &BuildDir, requested: Vec<String>) -> Result<Vec<String>> {
  let mut source = String::new();
  std::io::stdin().read_to_string(&mut source).context("Failed to load database")?;
  let groups = store::parse_groups(&source)?;
  let requested = if requested.is_empty() {
    groups.first().map(|(targets, _)| vec![targets[0].clone()]).unwrap_or_default()
  } else {
    requested
  };
  let mut lookup = std::collections::HashMap::new();
  for (targets, deps) in &groups {
    for target in targets {
      lookup.insert(target.as_str(), deps);
    }
  }
  let mut out = Vec::new();
  for target in &requested {
    let Some(deps) = lookup.get(target.as_str()) else { continue };
    out.extend(deps.iter().map(|dep| dir.normalize(dep)));
  }
  Ok(out)
}
