use crate::status::StatusRecord;

pub mod event;
pub mod writing;

/// Build event tracker. Can be used to implement logging, event tracing, progress reporting,
/// or test inspection.
///
/// Object-safe trait.
#[allow(unused_variables)]
pub trait Tracker {
  /// Start: a scheduler pass over a top-level request.
  #[inline]
  fn build_start(&mut self) {}
  /// End: the scheduler drained all clients and jobs.
  #[inline]
  fn build_end(&mut self) {}

  /// Start: computing the status of `target`.
  #[inline]
  fn check_start(&mut self, target: &str) {}
  /// End: computed `record` for `target`.
  #[inline]
  fn check_end(&mut self, target: &str, record: StatusRecord) {}

  /// A shell script starts for job `job_id` building `targets`.
  #[inline]
  fn script_start(&mut self, job_id: i32, targets: &[String]) {}
  /// Job `job_id` building `targets` completed.
  #[inline]
  fn job_completed(&mut self, job_id: i32, targets: &[String], success: bool) {}

  /// A client posted a request for `targets` from job `job_id`.
  #[inline]
  fn request_received(&mut self, job_id: i32, targets: &[String]) {}
  /// The request of the client of job `job_id` completed.
  #[inline]
  fn request_completed(&mut self, job_id: i32, success: bool) {}

  /// No applicable rule exists for `target`.
  #[inline]
  fn rule_missing(&mut self, target: &str) {}
  /// Every outstanding client waits on another one; the head client is being failed.
  #[inline]
  fn cycle_detected(&mut self) {}
  /// An ill-formed client message closed a connection.
  #[inline]
  fn protocol_error(&mut self) {}
}

/// Implement [`Tracker`] for `()` that does nothing.
impl Tracker for () {}

/// A [`Tracker`] that forwards events to two [`Tracker`]s.
#[derive(Default, Copy, Clone, Debug)]
pub struct CompositeTracker<A1, A2>(pub A1, pub A2);

impl<A1: Tracker, A2: Tracker> Tracker for CompositeTracker<A1, A2> {
  #[inline]
  fn build_start(&mut self) {
    self.0.build_start();
    self.1.build_start();
  }
  #[inline]
  fn build_end(&mut self) {
    self.0.build_end();
    self.1.build_end();
  }
  #[inline]
  fn check_start(&mut self, target: &str) {
    self.0.check_start(target);
    self.1.check_start(target);
  }
  #[inline]
  fn check_end(&mut self, target: &str, record: StatusRecord) {
    self.0.check_end(target, record);
    self.1.check_end(target, record);
  }
  #[inline]
  fn script_start(&mut self, job_id: i32, targets: &[String]) {
    self.0.script_start(job_id, targets);
    self.1.script_start(job_id, targets);
  }
  #[inline]
  fn job_completed(&mut self, job_id: i32, targets: &[String], success: bool) {
    self.0.job_completed(job_id, targets, success);
    self.1.job_completed(job_id, targets, success);
  }
  #[inline]
  fn request_received(&mut self, job_id: i32, targets: &[String]) {
    self.0.request_received(job_id, targets);
    self.1.request_received(job_id, targets);
  }
  #[inline]
  fn request_completed(&mut self, job_id: i32, success: bool) {
    self.0.request_completed(job_id, success);
    self.1.request_completed(job_id, success);
  }
  #[inline]
  fn rule_missing(&mut self, target: &str) {
    self.0.rule_missing(target);
    self.1.rule_missing(target);
  }
  #[inline]
  fn cycle_detected(&mut self) {
    self.0.cycle_detected();
    self.1.cycle_detected();
  }
  #[inline]
  fn protocol_error(&mut self) {
    self.0.protocol_error();
    self.1.protocol_error();
  }
}
