use std::io;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;

use crate::ipc;
use crate::server::Event;

/// Spawns a POSIX shell for job `job_id` with `script` fed on stdin. The shell runs with `-e`
/// (stop at the first failing command) and `-s` (read the script from stdin); `-v` echoes the
/// script when `echo` is set. `REMAKE_JOB_ID` and the server socket address are passed through
/// the environment so recursive invocations reach back to this build.
///
/// The exit status is delivered as an [`Event::JobExited`] on `events`; a thread per child
/// writes the script and waits, so the server never blocks on a shell.
pub fn spawn_script(
  job_id: i32,
  script: String,
  echo: bool,
  socket_path: &Path,
  events: Sender<Event>,
) -> io::Result<()> {
  let mut command = Command::new("/bin/sh");
  command.arg("-e").arg("-s");
  if echo {
    command.arg("-v");
  }
  command
    .env(ipc::JOB_ID_ENV, job_id.to_string())
    .env(ipc::SOCKET_ENV, socket_path)
    .stdin(Stdio::piped());
  let mut child = command.spawn()?;
  let mut stdin = child.stdin.take().expect("BUG: stdin was piped");
  thread::spawn(move || {
    if stdin.write_all(script.as_bytes()).is_err() {
      eprintln!("Unexpected failure while sending script to shell");
    }
    drop(stdin);
    let success = child.wait().map(|status| status.success()).unwrap_or(false);
    let _ = events.send(Event::JobExited { job_id, success });
  });
  Ok(())
}
