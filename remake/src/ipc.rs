use std::io;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

/// Environment variable holding the server socket path; its presence switches the executable to
/// client mode.
pub const SOCKET_ENV: &str = "REMAKE_SOCKET";

/// Environment variable holding the job id a script runs under; clients pass it back on the
/// wire.
pub const JOB_ID_ENV: &str = "REMAKE_JOB_ID";

/// A build request posted by a client: the job the posting script runs under (-1 when unknown)
/// and the targets it needs.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Request {
  pub job_id: i32,
  pub targets: Vec<String>,
}

/// Writes one request: the job id as 4 little-endian bytes, each target NUL-terminated, and a
/// final empty target ending the message.
pub fn write_request(writer: &mut impl Write, job_id: i32, targets: &[String]) -> io::Result<()> {
  writer.write_all(&job_id.to_le_bytes())?;
  for target in targets {
    writer.write_all(target.as_bytes())?;
    writer.write_all(&[0])?;
  }
  writer.write_all(&[0])?;
  writer.flush()
}

/// Reads one request, buffering until the two-NUL terminator appears.
pub fn read_request(reader: &mut impl Read) -> io::Result<Request> {
  let mut buffer: Vec<u8> = Vec::new();
  let mut chunk = [0u8; 1024];
  while buffer.len() < 6 || buffer[buffer.len() - 1] != 0 || buffer[buffer.len() - 2] != 0 {
    let read = reader.read(&mut chunk)?;
    if read == 0 {
      return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated request"));
    }
    buffer.extend_from_slice(&chunk[..read]);
  }
  let job_id = i32::from_le_bytes(buffer[0..4].try_into().expect("BUG: sliced 4 bytes"));
  let mut targets = Vec::new();
  for part in buffer[4..].split(|b| *b == 0) {
    if part.is_empty() {
      break;
    }
    targets.push(String::from_utf8_lossy(part).into_owned());
  }
  Ok(Request { job_id, targets })
}

/// Runs in client mode: connects to the server at `socket_path`, posts `targets` with the job
/// id inherited from the environment, and returns the process exit code. An empty target list
/// succeeds without connecting.
pub fn client_mode(socket_path: &str, targets: &[String]) -> i32 {
  if targets.is_empty() {
    return 0;
  }
  let job_id = std::env::var(JOB_ID_ENV)
    .ok()
    .and_then(|id| id.parse().ok())
    .unwrap_or(-1);
  match post_request(socket_path, job_id, targets) {
    Ok(true) => 0,
    Ok(false) => 1,
    Err(e) => {
      eprintln!("Failed to send targets to server: {e}");
      1
    }
  }
}

fn post_request(socket_path: &str, job_id: i32, targets: &[String]) -> io::Result<bool> {
  let mut stream = UnixStream::connect(socket_path)?;
  write_request(&mut stream, job_id, targets)?;
  let mut reply = [0u8; 1];
  stream.read_exact(&mut reply)?;
  Ok(reply[0] == 1)
}

#[cfg(test)]
mod test {
  use std::io::Cursor;

  use assert_matches::assert_matches;

  use super::*;

  fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_round_trip() {
    let mut wire = Vec::new();
    write_request(&mut wire, 7, &targets(&["a", "dir/b"])).unwrap();
    let request = read_request(&mut Cursor::new(wire)).unwrap();
    assert_eq!(request, Request { job_id: 7, targets: targets(&["a", "dir/b"]) });
  }

  #[test]
  fn test_round_trip_without_targets() {
    let mut wire = Vec::new();
    write_request(&mut wire, -1, &[]).unwrap();
    let request = read_request(&mut Cursor::new(wire)).unwrap();
    assert_eq!(request, Request { job_id: -1, targets: Vec::new() });
  }

  #[test]
  fn test_job_id_is_little_endian() {
    let mut wire = Vec::new();
    write_request(&mut wire, 1, &[]).unwrap();
    assert_eq!(&wire[0..4], &[1, 0, 0, 0]);
  }

  #[test]
  fn test_truncated_request_is_rejected() {
    let wire = vec![1, 0, 0, 0, b'a'];
    let result = read_request(&mut Cursor::new(wire));
    assert_matches!(result, Err(e) => {
      assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
    });
  }
}
