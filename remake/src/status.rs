use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::store::DepStore;
use crate::tracker::Tracker;

/// Build status of a target.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
  /// Target is up-to-date.
  Uptodate,
  /// Target is missing or obsolete.
  Todo,
  /// Target has an obsolete dependency.
  Recheck,
  /// Target is being rebuilt.
  Running,
  /// Target was successfully rebuilt.
  Remade,
  /// Build failed for target.
  Failed,
}

/// Status and last observed modification time of a target. An `mtime` of 0 means the file did
/// not exist at the observation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StatusRecord {
  pub state: State,
  pub mtime: i64,
}

impl Default for StatusRecord {
  #[inline]
  fn default() -> Self { Self { state: State::Uptodate, mtime: 0 } }
}

/// Memoised per-run status of all targets. Records are created lazily on first query and live
/// until the process exits.
pub struct StatusMap {
  records: HashMap<String, StatusRecord>,
  /// The second the server started at; files modified at or after it may have been remade
  /// during this run even when their modification time looks unchanged.
  now: i64,
}

impl StatusMap {
  pub fn new() -> Self {
    Self { records: HashMap::new(), now: system_time_secs(SystemTime::now()) }
  }

  /// Computes and memoises the status of `target`:
  ///
  /// - a target without a dependency group is `Todo` when missing and `Uptodate` otherwise,
  /// - a group with a missing sibling is `Todo`,
  /// - a dependency younger than the latest sibling makes the group `Todo`,
  /// - a dependency that is not `Uptodate` makes the group at least `Recheck`.
  ///
  /// The verdict is written into every sibling. Re-entrant queries for a target already being
  /// computed observe the `Uptodate` placeholder, which also terminates cyclic dependency
  /// graphs loaded from the database.
  pub fn get(&mut self, target: &str, deps: &DepStore, tracker: &mut dyn Tracker) -> StatusRecord {
    if let Some(record) = self.records.get(target) {
      return *record;
    }
    tracker.check_start(target);
    self.records.insert(target.to_string(), StatusRecord::default());
    let Some(group) = deps.get(target) else {
      let mtime = file_mtime(target);
      let state = if mtime == 0 { State::Todo } else { State::Uptodate };
      let record = StatusRecord { state, mtime };
      self.records.insert(target.to_string(), record);
      tracker.check_end(target, record);
      return record;
    };
    let group = group.borrow().clone();
    let mut state = State::Uptodate;
    let mut latest = 0;
    for sibling in &group.targets {
      let mtime = file_mtime(sibling);
      if mtime == 0 {
        state = State::Todo;
      }
      self.records.entry(sibling.clone()).or_default().mtime = mtime;
      if mtime > latest {
        latest = mtime;
      }
    }
    if state != State::Todo {
      for dep in &group.deps {
        let dep_record = self.get(dep, deps, tracker);
        if latest < dep_record.mtime {
          state = State::Todo;
          break;
        }
        if dep_record.state != State::Uptodate {
          state = State::Recheck;
        }
      }
    }
    for sibling in &group.targets {
      self.records.entry(sibling.clone()).or_default().state = state;
    }
    let record = self.records[target];
    tracker.check_end(target, record);
    record
  }

  /// The memoised state of `target`.
  ///
  /// # Panics
  ///
  /// Panics if `target` has no status record yet.
  #[inline]
  pub fn state_of(&self, target: &str) -> State {
    let Some(record) = self.records.get(target) else {
      panic!("BUG: no status record for {target}");
    };
    record.state
  }

  /// Sets the state of `target`, creating its record when absent.
  #[inline]
  pub fn set_state(&mut self, target: &str, state: State) {
    self.records.entry(target.to_string()).or_default().state = state;
  }

  /// Re-observes `target` after its job succeeded: an unchanged modification time from before
  /// the server started means the file was not touched and the target is `Uptodate`; anything
  /// else means `Remade`.
  pub fn update(&mut self, target: &str) {
    let Some(record) = self.records.get_mut(target) else {
      panic!("BUG: no status record for {target}");
    };
    record.state = State::Remade;
    if record.mtime >= self.now {
      return;
    }
    let mtime = file_mtime(target);
    if mtime == 0 {
      record.mtime = 0;
    } else if mtime != record.mtime {
      record.mtime = mtime;
    } else {
      record.state = State::Uptodate;
    }
  }

  /// Decides whether `target` still has to be rebuilt once its prerequisites completed. A job
  /// scheduled for a reason other than a suspect dependency always rebuilds. Otherwise, if every
  /// dependency ended up `Uptodate`, the suspicion was unfounded: all siblings flip to
  /// `Uptodate` and nothing runs.
  pub fn still_need_rebuild(&mut self, target: &str, from_recheck: bool, deps: &DepStore) -> bool {
    if !from_recheck {
      return true;
    }
    let Some(group) = deps.get(target) else {
      panic!("BUG: no dependency group for {target}");
    };
    let group = group.borrow().clone();
    for dep in &group.deps {
      let state = self.records.get(dep).map(|r| r.state).unwrap_or(State::Uptodate);
      if state != State::Uptodate {
        return true;
      }
    }
    for sibling in &group.targets {
      self.records.entry(sibling.clone()).or_default().state = State::Uptodate;
    }
    false
  }
}

/// Modification time of the file at `path` in whole seconds, or 0 when it does not exist.
fn file_mtime(path: &str) -> i64 {
  std::fs::metadata(path)
    .and_then(|m| m.modified())
    .map(system_time_secs)
    .unwrap_or(0)
}

#[inline]
fn system_time_secs(time: SystemTime) -> i64 {
  match time.duration_since(UNIX_EPOCH) {
    Ok(duration) => duration.as_secs() as i64,
    Err(_) => 0,
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use dev_shared::{age_file, create_temp_dir, write_file};
  use rstest::{fixture, rstest};
  use tempfile::TempDir;

  use super::*;

  #[fixture]
  fn dir() -> TempDir {
    create_temp_dir()
  }

  fn target(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_string_lossy().into_owned()
  }

  #[rstest]
  fn test_ungrouped_target_missing_is_todo(dir: TempDir) {
    let mut status = StatusMap::new();
    let record = status.get(&target(&dir, "absent"), &DepStore::default(), &mut ());
    assert_eq!(record, StatusRecord { state: State::Todo, mtime: 0 });
  }

  #[rstest]
  fn test_ungrouped_target_present_is_uptodate(dir: TempDir) {
    let a = target(&dir, "a");
    write_file(&a, "a");
    let mut status = StatusMap::new();
    let record = status.get(&a, &DepStore::default(), &mut ());
    assert_eq!(record.state, State::Uptodate);
    assert!(record.mtime > 0);
  }

  #[rstest]
  fn test_missing_sibling_makes_group_todo(dir: TempDir) {
    let (a, b) = (target(&dir, "a"), target(&dir, "b"));
    write_file(&a, "a");
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone(), b.clone()], &[]);
    let mut status = StatusMap::new();
    assert_eq!(status.get(&a, &deps, &mut ()).state, State::Todo);
    assert_eq!(status.state_of(&b), State::Todo);
  }

  #[rstest]
  fn test_dep_older_than_latest_sibling_is_uptodate(dir: TempDir) {
    let (a, b, d) = (target(&dir, "a"), target(&dir, "b"), target(&dir, "d"));
    write_file(&a, "a");
    write_file(&b, "b");
    write_file(&d, "d");
    age_file(&a, Duration::from_secs(30));
    age_file(&d, Duration::from_secs(20));
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone(), b.clone()], &[d.clone()]);
    let mut status = StatusMap::new();
    // The dependency is younger than sibling `a` but older than the latest sibling.
    assert_eq!(status.get(&a, &deps, &mut ()).state, State::Uptodate);
  }

  #[rstest]
  fn test_dep_younger_than_latest_sibling_is_todo(dir: TempDir) {
    let (a, d) = (target(&dir, "a"), target(&dir, "d"));
    write_file(&a, "a");
    write_file(&d, "d");
    age_file(&a, Duration::from_secs(30));
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone()], &[d.clone()]);
    let mut status = StatusMap::new();
    assert_eq!(status.get(&a, &deps, &mut ()).state, State::Todo);
  }

  #[rstest]
  fn test_obsolete_dep_makes_target_recheck(dir: TempDir) {
    let (a, d) = (target(&dir, "a"), target(&dir, "d"));
    write_file(&a, "a");
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone()], &[d.clone()]);
    deps.add_deps(&d, &[]);
    let mut status = StatusMap::new();
    // The dependency is missing, hence Todo, but not younger than `a`: suspicion only.
    assert_eq!(status.get(&a, &deps, &mut ()).state, State::Recheck);
  }

  #[rstest]
  fn test_get_is_memoised(dir: TempDir) {
    let a = target(&dir, "a");
    let mut status = StatusMap::new();
    let first = status.get(&a, &DepStore::default(), &mut ());
    write_file(&a, "a");
    let second = status.get(&a, &DepStore::default(), &mut ());
    assert_eq!(first, second);
  }

  #[rstest]
  fn test_cyclic_groups_terminate(dir: TempDir) {
    let (a, b) = (target(&dir, "a"), target(&dir, "b"));
    write_file(&a, "a");
    write_file(&b, "b");
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone()], &[b.clone()]);
    deps.bind_group(&[b.clone()], &[a.clone()]);
    let mut status = StatusMap::new();
    // Terminates because the re-entrant query observes the placeholder.
    status.get(&a, &deps, &mut ());
  }

  #[rstest]
  fn test_update_unchanged_file_is_uptodate(dir: TempDir) {
    let a = target(&dir, "a");
    write_file(&a, "a");
    age_file(&a, Duration::from_secs(30));
    let mut status = StatusMap::new();
    status.get(&a, &DepStore::default(), &mut ());
    status.update(&a);
    assert_eq!(status.state_of(&a), State::Uptodate);
  }

  #[rstest]
  fn test_update_modified_file_is_remade(dir: TempDir) {
    let a = target(&dir, "a");
    write_file(&a, "a");
    age_file(&a, Duration::from_secs(30));
    let mut status = StatusMap::new();
    status.get(&a, &DepStore::default(), &mut ());
    write_file(&a, "rebuilt");
    age_file(&a, Duration::from_secs(10));
    status.update(&a);
    assert_eq!(status.state_of(&a), State::Remade);
  }

  #[rstest]
  fn test_update_missing_file_is_remade(dir: TempDir) {
    let a = target(&dir, "a");
    write_file(&a, "a");
    age_file(&a, Duration::from_secs(30));
    let mut status = StatusMap::new();
    status.get(&a, &DepStore::default(), &mut ());
    std::fs::remove_file(&a).unwrap();
    status.update(&a);
    assert_eq!(status.records[&a], StatusRecord { state: State::Remade, mtime: 0 });
  }

  #[rstest]
  fn test_still_need_rebuild_collapses_unfounded_recheck(dir: TempDir) {
    let (a, b, d) = (target(&dir, "a"), target(&dir, "b"), target(&dir, "d"));
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone(), b.clone()], &[d.clone()]);
    let mut status = StatusMap::new();
    status.set_state(&a, State::Running);
    status.set_state(&b, State::Running);
    status.set_state(&d, State::Uptodate);
    assert!(!status.still_need_rebuild(&a, true, &deps));
    assert_eq!(status.state_of(&a), State::Uptodate);
    assert_eq!(status.state_of(&b), State::Uptodate);
  }

  #[rstest]
  fn test_still_need_rebuild_with_remade_dep(dir: TempDir) {
    let (a, d) = (target(&dir, "a"), target(&dir, "d"));
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone()], &[d.clone()]);
    let mut status = StatusMap::new();
    status.set_state(&a, State::Running);
    status.set_state(&d, State::Remade);
    assert!(status.still_need_rebuild(&a, true, &deps));
    assert_eq!(status.state_of(&a), State::Running);
  }

  #[rstest]
  fn test_still_need_rebuild_without_recheck_verdict(dir: TempDir) {
    let a = target(&dir, "a");
    let mut deps = DepStore::default();
    deps.bind_group(&[a.clone()], &[]);
    let mut status = StatusMap::new();
    status.set_state(&a, State::Running);
    assert!(status.still_need_rebuild(&a, false, &deps));
  }
}
