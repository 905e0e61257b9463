//! Client helper for sending commands to the attn daemon.
//!
//! One connection per command, one reply line per request. Hook paths retry
//! once when the connection itself could not be opened. Once a request may
//! have reached the daemon it is never resent; daemon-side errors are returned
//! as replies.

use attn_daemon_protocol::{Command, Response, MAX_REQUEST_BYTES};
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const ENABLE_ENV: &str = "ATTN_DAEMON_ENABLED";
const READ_TIMEOUT_MS: u64 = 600;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

/// Stop replies wait for the classifier, which the daemon bounds at 30s.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(READ_TIMEOUT_MS);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon disabled via ATTN_DAEMON_ENABLED")]
    Disabled,

    #[error("failed to resolve daemon socket: {0}")]
    SocketPath(#[from] attn_core::AttnError),

    #[error("failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write request: {0}")]
    Write(#[source] std::io::Error),

    #[error("timed out waiting for daemon response")]
    Timeout,

    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),

    #[error("daemon response exceeded maximum size")]
    TooLarge,

    #[error("daemon closed the connection without a response")]
    Empty,

    #[error("failed to parse response JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => !matches!(value.as_str(), "0" | "false" | "FALSE" | "no" | "NO"),
        Err(_) => true,
    }
}

/// Sends one command and waits up to `timeout` for its reply.
pub fn send(command: &Command, timeout: Duration) -> Result<Response, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }
    let mut stream = connect(timeout)?;
    write_command(&mut stream, command)?;
    read_response(&mut stream)
}

/// Like [`send`], retrying once when connecting to the daemon failed.
pub fn send_with_retry(command: &Command, timeout: Duration) -> Result<Response, ClientError> {
    retry_connect(command.name(), || send(command, timeout))
}

fn retry_connect<F>(cmd: &str, mut attempt: F) -> Result<Response, ClientError>
where
    F: FnMut() -> Result<Response, ClientError>,
{
    match attempt() {
        Err(err @ ClientError::Connect { .. }) => {
            tracing::warn!(cmd, error = %err, "Failed to connect to daemon");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            attempt().map_err(|retry_err| {
                tracing::warn!(cmd, error = %retry_err, "Retry failed sending command to daemon");
                retry_err
            })
        }
        Err(err) => {
            tracing::warn!(cmd, error = %err, "Failed to send command to daemon");
            Err(err)
        }
        ok => ok,
    }
}

/// Opens an observer connection; the caller reads event lines from the reader.
pub fn subscribe() -> Result<BufReader<UnixStream>, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }
    let mut stream = connect(DEFAULT_TIMEOUT)?;
    write_command(&mut stream, &Command::Subscribe)?;
    stream.set_read_timeout(None).map_err(ClientError::Read)?;
    Ok(BufReader::new(stream))
}

fn connect(timeout: Duration) -> Result<UnixStream, ClientError> {
    let path = attn_core::paths::socket_path()?;
    let stream =
        UnixStream::connect(&path).map_err(|source| ClientError::Connect { path, source })?;
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
    Ok(stream)
}

fn write_command(stream: &mut UnixStream, command: &Command) -> Result<(), ClientError> {
    let mut line = command.to_line()?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .map_err(ClientError::Write)?;
    stream.flush().map_err(ClientError::Write)
}

fn read_response<R: Read>(stream: R) -> Result<Response, ClientError> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES as u64 + 1));
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(_) => {}
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            return Err(ClientError::Timeout);
        }
        Err(err) => return Err(ClientError::Read(err)),
    }
    if line.len() > MAX_REQUEST_BYTES {
        return Err(ClientError::TooLarge);
    }
    let text = String::from_utf8_lossy(&line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}
