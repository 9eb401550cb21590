use crate::status::{State, StatusRecord};
use crate::tracker::Tracker;

/// A [`Tracker`] that stores [`Event`]s in a [`Vec`], useful in testing situations where build
/// events are checked after building.
#[derive(Clone, Debug, Default)]
pub struct EventTracker {
  events: Vec<Event>,
}

#[derive(Clone, Debug)]
pub enum Event {
  BuildStart,
  BuildEnd,
  CheckEnd { target: String, record: StatusRecord },
  ScriptStart { job_id: i32, targets: Vec<String> },
  JobCompleted { job_id: i32, targets: Vec<String>, success: bool },
  RequestReceived { job_id: i32, targets: Vec<String> },
  RequestCompleted { job_id: i32, success: bool },
  RuleMissing { target: String },
  CycleDetected,
  ProtocolError,
}

impl Event {
  #[inline]
  pub fn is_script_start_of(&self, target: &str) -> bool {
    match self {
      Event::ScriptStart { targets, .. } => targets.iter().any(|t| t == target),
      _ => false,
    }
  }

  #[inline]
  pub fn match_check_end(&self, of: &str) -> Option<State> {
    match self {
      Event::CheckEnd { target, record } if target == of => Some(record.state),
      _ => None,
    }
  }
}

impl EventTracker {
  /// Returns an iterator over all events.
  #[inline]
  pub fn iter(&self) -> impl Iterator<Item = &Event> { self.events.iter() }

  /// Returns `true` if `predicate` returns `true` for any event.
  #[inline]
  pub fn any(&self, predicate: impl FnMut(&Event) -> bool) -> bool {
    self.events.iter().any(predicate)
  }

  /// Returns the number of events for which `predicate` returns `true`.
  #[inline]
  pub fn count(&self, predicate: impl FnMut(&&Event) -> bool) -> usize {
    self.events.iter().filter(predicate).count()
  }

  /// Returns `true` if `predicate` returns `true` for exactly one event.
  #[inline]
  pub fn one(&self, predicate: impl FnMut(&&Event) -> bool) -> bool {
    self.count(predicate) == 1
  }

  /// Returns `Some(v)` for the first event where `f` returns `Some(v)`.
  #[inline]
  pub fn find<R>(&self, f: impl FnMut(&Event) -> Option<R>) -> Option<R> {
    self.events.iter().find_map(f)
  }

  /// Returns `true` when a shell was started for `target`.
  #[inline]
  pub fn any_script_start_of(&self, target: &str) -> bool {
    self.any(|e| e.is_script_start_of(target))
  }
}

impl Tracker for EventTracker {
  #[inline]
  fn build_start(&mut self) {
    self.events.push(Event::BuildStart);
  }
  #[inline]
  fn build_end(&mut self) {
    self.events.push(Event::BuildEnd);
  }
  #[inline]
  fn check_end(&mut self, target: &str, record: StatusRecord) {
    self.events.push(Event::CheckEnd { target: target.to_string(), record });
  }
  #[inline]
  fn script_start(&mut self, job_id: i32, targets: &[String]) {
    self.events.push(Event::ScriptStart { job_id, targets: targets.to_vec() });
  }
  #[inline]
  fn job_completed(&mut self, job_id: i32, targets: &[String], success: bool) {
    self.events.push(Event::JobCompleted { job_id, targets: targets.to_vec(), success });
  }
  #[inline]
  fn request_received(&mut self, job_id: i32, targets: &[String]) {
    self.events.push(Event::RequestReceived { job_id, targets: targets.to_vec() });
  }
  #[inline]
  fn request_completed(&mut self, job_id: i32, success: bool) {
    self.events.push(Event::RequestCompleted { job_id, success });
  }
  #[inline]
  fn rule_missing(&mut self, target: &str) {
    self.events.push(Event::RuleMissing { target: target.to_string() });
  }
  #[inline]
  fn cycle_detected(&mut self) {
    self.events.push(Event::CycleDetected);
  }
  #[inline]
  fn protocol_error(&mut self) {
    self.events.push(Event::ProtocolError);
  }
}
