use std::time::{Duration, SystemTime};

use dev_shared::{create_temp_dir, read_file, set_mtime, write_file};

mod common;
use common::{building_count, remake, stderr_of, stdout_of};

#[test]
fn test_help_exits_zero() {
  let dir = create_temp_dir();
  let output = remake(dir.path()).arg("--help").output().unwrap();
  assert!(output.status.success());
  assert!(stderr_of(&output).contains("Usage: remake"));
}

#[test]
fn test_unknown_option_exits_one_with_usage() {
  let dir = create_temp_dir();
  let output = remake(dir.path()).arg("--frobnicate").output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("Usage: remake"));
}

#[test]
fn test_missing_rule_file_is_fatal() {
  let dir = create_temp_dir();
  let output = remake(dir.path()).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("Failed to load rules"));
  assert!(!dir.path().join(".remake").exists());
}

#[test]
fn test_unbuildable_target_fails() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), "a:\n\techo a > a\n");
  let output = remake(dir.path()).arg("ghost").output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("No rule for building ghost"));
}

#[test]
fn test_silent_suppresses_building_lines() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), "a:\n\techo a > a\n");
  let output = remake(dir.path()).arg("-s").output().unwrap();
  assert!(output.status.success());
  assert_eq!(stdout_of(&output), "");
  assert!(dir.path().join("a").exists());
}

#[test]
fn test_alternate_rule_file() {
  let dir = create_temp_dir();
  write_file(dir.path().join("rules.mk"), "a:\n\techo a > a\n");
  remake(dir.path()).args(["-f", "rules.mk"]).assert().success();
  assert_eq!(read_file(dir.path().join("a")), "a\n");
}

#[test]
fn test_keep_going_builds_unrelated_targets() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), "a:\n\tfalse\nb:\n\techo b > b\n");

  // Without -k the first failure aborts the request.
  let output = remake(dir.path()).args(["a", "b"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(!dir.path().join("b").exists());

  let output = remake(dir.path()).args(["-k", "a", "b"]).output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert_eq!(read_file(dir.path().join("b")), "b\n");
}

#[test]
fn test_failed_job_unlinks_half_written_outputs() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), "a:\n\techo partial > a\n\tfalse\n");
  let output = remake(dir.path()).arg("a").output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert!(stderr_of(&output).contains("Failed to build a"));
  assert!(!dir.path().join("a").exists());
}

#[test]
fn test_obsolete_rule_file_is_rebuilt_first() {
  let dir = create_temp_dir();
  write_file(
    dir.path().join("Remakefile"),
    "out:\n\techo old > out\nRemakefile: Remakefile.in\n\tcp Remakefile.in Remakefile\n",
  );
  write_file(
    dir.path().join("Remakefile.in"),
    "out:\n\techo new > out\nRemakefile: Remakefile.in\n\tcp Remakefile.in Remakefile\n",
  );
  set_mtime(dir.path().join("Remakefile.in"), SystemTime::now() + Duration::from_secs(5));

  remake(dir.path()).arg("out").assert().success();
  // The reloaded rules, not the stale ones, built the target.
  assert_eq!(read_file(dir.path().join("out")), "new\n");
}

#[test]
fn test_parallel_jobs_overlap() {
  let dir = create_temp_dir();
  write_file(
    dir.path().join("Remakefile"),
    "a:
	touch a.started
	sleep 1
	test -e b.started
	echo a > a
b:
	touch b.started
	sleep 1
	test -e a.started
	echo b > b
",
  );
  // Each script only succeeds if it observes the other one running.
  remake(dir.path()).args(["--jobs=2", "a", "b"]).assert().success();
  assert_eq!(read_file(dir.path().join("a")), "a\n");
  assert_eq!(read_file(dir.path().join("b")), "b\n");
}

#[test]
fn test_attached_job_count_is_accepted() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), "a:\n\techo a > a\n");
  remake(dir.path()).args(["-j2", "a"]).assert().success();
  remake(dir.path()).args(["-j", "a"]).assert().success();
  // A non-positive count means unbounded, as with --jobs=-1.
  remake(dir.path()).args(["-j-1", "a"]).assert().success();
}

#[test]
fn test_indirect_targets_from_stdin() {
  let dir = create_temp_dir();
  write_file(
    dir.path().join("Remakefile"),
    "all: b c
	touch all
b:
	echo b > b
c:
	echo c > c
",
  );
  // -r builds the recorded dependencies of the named target, not the target itself.
  let output = remake(dir.path())
    .arg("-r")
    .write_stdin("all : b c\n")
    .output()
    .unwrap();
  assert!(output.status.success());
  assert!(dir.path().join("b").exists());
  assert!(dir.path().join("c").exists());
  assert!(!dir.path().join("all").exists());
}

#[test]
fn test_order_only_prerequisites_do_not_trigger_rebuilds() {
  let dir = create_temp_dir();
  write_file(
    dir.path().join("Remakefile"),
    "a: b | c
	cat b > a
b:
	echo b > b
c:
	echo c > c
",
  );
  remake(dir.path()).assert().success();
  assert!(dir.path().join("c").exists());
  assert_eq!(read_file(dir.path().join("a")), "b\n");

  // A younger order-only prerequisite is no reason to rebuild.
  set_mtime(dir.path().join("c"), SystemTime::now() + Duration::from_secs(5));
  let output = remake(dir.path()).output().unwrap();
  assert!(output.status.success());
  assert_eq!(building_count(&output), 0);
}
