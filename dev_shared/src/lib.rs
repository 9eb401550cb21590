use std::fs::OpenOptions;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// Creates a new temporary directory that gets cleaned up when dropped.
pub fn create_temp_dir() -> TempDir {
  TempDir::new().expect("failed to create temporary directory")
}

/// Writes `contents` to the file at `path`, creating it if needed.
pub fn write_file(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
  std::fs::write(path, contents).expect("failed to write file");
}

/// Reads the file at `path` to a string.
pub fn read_file(path: impl AsRef<Path>) -> String {
  std::fs::read_to_string(path).expect("failed to read file")
}

/// Sets the modification time of the file at `path`.
///
/// Freshness comparisons on modification times have second granularity, so tests stage explicit
/// timestamps instead of relying on write order.
pub fn set_mtime(path: impl AsRef<Path>, time: SystemTime) {
  let file = OpenOptions::new().write(true).open(path).expect("failed to open file");
  file.set_modified(time).expect("failed to set modification time");
}

/// Moves the modification time of the file at `path` into the past by `by`.
pub fn age_file(path: impl AsRef<Path>, by: Duration) {
  set_mtime(path, SystemTime::now() - by);
}
