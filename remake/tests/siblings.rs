use dev_shared::{create_temp_dir, read_file, write_file};

mod common;
use common::remake;

const RULES: &str = "a: b c
	touch a
b: d
	cat d > b
c d:
	echo d$TAG > d
	touch c
";

#[test]
fn test_one_missing_sibling_rebuilds_the_whole_group() {
  let dir = create_temp_dir();
  write_file(dir.path().join("Remakefile"), RULES);

  remake(dir.path()).env("TAG", "1").assert().success();
  assert_eq!(read_file(dir.path().join("b")), "d1\n");
  assert!(dir.path().join("c").exists());

  // Only the stamp sibling `c` disappears, but the verdict is shared: `d` is rewritten too,
  // and everything downstream of `d` follows.
  std::fs::remove_file(dir.path().join("c")).unwrap();
  remake(dir.path()).env("TAG", "2").assert().success();
  assert_eq!(read_file(dir.path().join("d")), "d2\n");
  assert_eq!(read_file(dir.path().join("b")), "d2\n");
  assert!(dir.path().join("c").exists());
}
