use std::time::{Duration, SystemTime};

use dev_shared::{create_temp_dir, read_file, set_mtime, write_file};

mod common;
use common::{building_count, built, remake};

const RULES: &str = "a: b c
	cat b c > a
b:
	echo b > b
c:
	echo c > c
";

#[test]
fn test_build_from_scratch_then_repair() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), RULES);

  // The default target is `a`, the first target of the first scripted rule.
  remake(dir.path()).assert().success();
  assert_eq!(read_file(dir.path().join("a")), "b\nc\n");
  assert_eq!(read_file(dir.path().join("b")), "b\n");
  assert_eq!(read_file(dir.path().join("c")), "c\n");

  // A truncated target with a missing prerequisite is repaired to its original contents.
  write_file(dir.path().join("a"), "");
  std::fs::remove_file(dir.path().join("b")).unwrap();
  remake(dir.path()).assert().success();
  assert_eq!(read_file(dir.path().join("a")), "b\nc\n");
}

#[test]
fn test_database_contents_and_stability() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), RULES);

  remake(dir.path()).assert().success();
  let db = read_file(dir.path().join(".remake"));
  assert_eq!(db, "a : b c\nb :\nc :\n");

  // A run with no source changes rebuilds nothing and leaves the database identical.
  let output = remake(dir.path()).output().unwrap();
  assert!(output.status.success());
  assert_eq!(building_count(&output), 0);
  assert_eq!(read_file(dir.path().join(".remake")), db);
}

#[test]
fn test_touched_leaf_rebuilds_exactly_its_dependants() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), RULES);
  remake(dir.path()).assert().success();

  // Stage the leaf strictly newer than its dependant, beyond clock granularity.
  set_mtime(dir.path().join("b"), SystemTime::now() + Duration::from_secs(5));
  let output = remake(dir.path()).output().unwrap();
  assert!(output.status.success());
  assert!(built(&output, "a"));
  assert!(!built(&output, "b"));
  assert!(!built(&output, "c"));
}
