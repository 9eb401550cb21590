use std::io;
use std::io::{Stdout, Write};

use crate::status::StatusRecord;
use crate::tracker::Tracker;

/// A [`Tracker`] that writes build progress to a [`std::io::Write`] instance and diagnostics to
/// stderr. Status-check traces are written (indented by recursion depth) only when `trace` is
/// enabled; the per-job "Building" line is suppressed when `show_targets` is off.
#[derive(Debug)]
pub struct WritingTracker<W> {
  writer: W,
  show_targets: bool,
  trace: bool,
  indentation: u32,
}

impl Default for WritingTracker<Stdout> {
  #[inline]
  fn default() -> Self { Self::new_stdout_writer(true, false) }
}

impl WritingTracker<Stdout> {
  #[inline]
  pub fn new_stdout_writer(show_targets: bool, trace: bool) -> Self {
    Self::new(io::stdout(), show_targets, trace)
  }
}

impl<W: Write> WritingTracker<W> {
  #[inline]
  pub fn new(writer: W, show_targets: bool, trace: bool) -> Self {
    Self { writer, show_targets, trace, indentation: 0 }
  }

  fn trace(&mut self, line: std::fmt::Arguments) {
    if !self.trace { return; }
    eprintln!("{:indent$}{line}", "", indent = (self.indentation * 2) as usize);
  }
}

impl<W: Write> Tracker for WritingTracker<W> {
  #[inline]
  fn check_start(&mut self, target: &str) {
    self.trace(format_args!("checking status of {target}"));
    self.indentation = self.indentation.saturating_add(1);
  }
  #[inline]
  fn check_end(&mut self, target: &str, record: StatusRecord) {
    self.indentation = self.indentation.saturating_sub(1);
    self.trace(format_args!("{target}: {:?} ({})", record.state, record.mtime));
  }

  #[inline]
  fn script_start(&mut self, _job_id: i32, targets: &[String]) {
    if !self.show_targets { return; }
    let _ = writeln!(self.writer, "Building {}", targets.join(" "));
    let _ = self.writer.flush();
  }
  #[inline]
  fn job_completed(&mut self, job_id: i32, targets: &[String], success: bool) {
    self.trace(format_args!("completed job {job_id}: success = {success}"));
    if !success {
      eprintln!("Failed to build {}", targets.join(" "));
    }
  }

  #[inline]
  fn request_received(&mut self, job_id: i32, targets: &[String]) {
    self.trace(format_args!("request from job {job_id}: {}", targets.join(" ")));
  }
  #[inline]
  fn request_completed(&mut self, job_id: i32, success: bool) {
    self.trace(format_args!("completed request of job {job_id}: success = {success}"));
  }

  #[inline]
  fn rule_missing(&mut self, target: &str) {
    eprintln!("No rule for building {target}");
  }
  #[inline]
  fn cycle_detected(&mut self) {
    eprintln!("Circular dependency detected");
  }
  #[inline]
  fn protocol_error(&mut self) {
    eprintln!("Received an ill-formed client message");
  }
}
