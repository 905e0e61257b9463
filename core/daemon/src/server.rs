//! Control-socket connection handling.
//!
//! Every accepted connection gets its own thread. A connection carries one or
//! more request lines and gets one reply line per request, in order. Sending
//! `subscribe` turns the connection into an observer stream; further lines on
//! it are still dispatched, with replies queued behind pending events.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use attn_daemon_protocol::{
    parse_command, Command, ErrorInfo, Response, ERROR_TOO_MANY_CONNECTIONS, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

use crate::broadcast::{Line, SubscriberId};
use crate::config::ServerConfig;
use crate::registry::{Registry, RegistryError};
use crate::stop::StopResolver;

const WRITE_TIMEOUT_SECS: u64 = 5;

/// Everything a connection handler needs, shared across connection threads.
pub struct ServerContext {
    registry: Arc<Registry>,
    resolver: StopResolver,
    config: ServerConfig,
    active_connections: AtomicUsize,
}

impl ServerContext {
    pub fn new(registry: Arc<Registry>, resolver: StopResolver, config: ServerConfig) -> Self {
        Self {
            registry,
            resolver,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let previous = self.active_connections.fetch_add(1, Ordering::AcqRel);
        if previous >= self.config.max_connections {
            self.active_connections.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(ConnectionSlot(Arc::clone(self)))
    }
}

/// Holds one unit of the connection budget until dropped.
struct ConnectionSlot(Arc<ServerContext>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

enum ReadOutcome {
    Line(Vec<u8>),
    Eof,
}

pub fn serve(listener: UnixListener, context: Arc<ServerContext>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let context = Arc::clone(&context);
                thread::spawn(move || handle_connection(stream, context));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
            }
        }
    }
}

pub fn handle_connection(mut stream: UnixStream, context: Arc<ServerContext>) {
    let Some(_slot) = context.try_acquire() else {
        warn!(
            max = context.config.max_connections,
            "Rejecting connection over limit"
        );
        let response = Response::error(ERROR_TOO_MANY_CONNECTIONS, "too many connections");
        let _ = write_response(&mut stream, &response);
        return;
    };

    let _ = stream.set_read_timeout(Some(context.config.read_timeout()));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));
    let mut reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(err) => {
            warn!(error = %err, "Failed to clone connection stream");
            return;
        }
    };

    let mut served = 0usize;
    loop {
        let bytes = match read_line(&mut reader) {
            Ok(ReadOutcome::Line(bytes)) => bytes,
            Ok(ReadOutcome::Eof) => break,
            Err(err) if err.code == "read_timeout" && served > 0 => {
                debug!(served, "Idle connection closed");
                break;
            }
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "Failed to read request");
                let _ = write_response(&mut stream, &Response::error_with_info(err));
                break;
            }
        };
        served += 1;

        let command = match decode(&bytes) {
            Ok(command) => command,
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "Rejected request");
                if write_response(&mut stream, &Response::error_with_info(err)).is_err() {
                    break;
                }
                continue;
            }
        };

        if let Command::Subscribe = command {
            serve_subscriber(reader, stream, context);
            return;
        }

        let response = dispatch(&context, command);
        if let Err(err) = write_response(&mut stream, &response) {
            debug!(error = %err, "Failed to write response");
            break;
        }
    }
}

/// Turns the connection into an observer: this thread writes queued lines, a
/// second thread keeps reading and dispatching requests from the peer.
fn serve_subscriber(
    reader: BufReader<UnixStream>,
    mut stream: UnixStream,
    context: Arc<ServerContext>,
) {
    let subscription = match context.registry.subscribe() {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(error = %err, "Subscribe rejected");
            let _ = write_response(&mut stream, &registry_error(err));
            return;
        }
    };
    let id = subscription.id;
    info!(subscriber_id = id, "Observer subscribed");

    // Observers stay connected indefinitely.
    let _ = stream.set_read_timeout(None);

    let reader_context = Arc::clone(&context);
    let reader_thread = thread::spawn(move || read_subscriber_requests(reader, reader_context, id));

    for line in subscription.receiver.iter() {
        if let Err(err) = write_line(&mut stream, &line) {
            debug!(subscriber_id = id, error = %err, "Observer write failed");
            break;
        }
    }

    context.registry.hub().remove(id);
    let _ = stream.shutdown(Shutdown::Both);
    let _ = reader_thread.join();
    info!(subscriber_id = id, "Observer disconnected");
}

fn read_subscriber_requests(
    mut reader: BufReader<UnixStream>,
    context: Arc<ServerContext>,
    id: SubscriberId,
) {
    let hub = Arc::clone(context.registry.hub());
    loop {
        let response = match read_line(&mut reader) {
            Ok(ReadOutcome::Line(bytes)) => match decode(&bytes) {
                Ok(Command::Subscribe) => {
                    Response::error("already_subscribed", "connection is already subscribed")
                }
                Ok(command) => dispatch(&context, command),
                Err(err) => Response::error_with_info(err),
            },
            Ok(ReadOutcome::Eof) => break,
            Err(err) => {
                debug!(subscriber_id = id, code = %err.code, "Observer read ended");
                break;
            }
        };

        let line = match serde_json::to_string(&response) {
            Ok(line) => Line::from(line),
            Err(err) => {
                warn!(error = %err, "Failed to serialize response");
                continue;
            }
        };
        if !hub.send_to(id, line) {
            break;
        }
    }
    hub.remove(id);
}

fn decode(bytes: &[u8]) -> Result<Command, ErrorInfo> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }
    parse_command(bytes)
}

fn dispatch(context: &ServerContext, command: Command) -> Response {
    let registry = &context.registry;
    debug!(cmd = command.name(), id = ?command.target_id(), "Request received");

    match command {
        Command::Register(register) => {
            registry.register(register);
            Response::ok()
        }
        Command::Unregister { id } => {
            registry.unregister(&id);
            Response::ok()
        }
        Command::State { id, state } => match registry.set_state(&id, state) {
            Ok(_) => Response::ok(),
            Err(err) => registry_error(err),
        },
        Command::Stop(stop) => match context.resolver.resolve(&stop) {
            Ok(state) => Response::ok().with_state(state),
            Err(err) => registry_error(err),
        },
        Command::Todos { id, todos } => match registry.set_todos(&id, todos) {
            Ok(()) => Response::ok(),
            Err(err) => registry_error(err),
        },
        Command::Query { state } => Response::sessions(registry.query(state)),
        Command::Heartbeat { id } => match registry.touch(&id) {
            Ok(()) => Response::ok(),
            Err(err) => registry_error(err),
        },
        Command::Mute { id, kind } => match registry.mute(kind, &id) {
            Ok(muted) => Response::ok().with_muted(muted),
            Err(err) => registry_error(err),
        },
        Command::UndoMute => match registry.undo_mute() {
            Ok(_) => Response::ok().with_muted(false),
            Err(err) => registry_error(err),
        },
        Command::ClearLastMuted => {
            registry.clear_last_muted();
            Response::ok()
        }
        Command::Subscribe => {
            Response::error("already_subscribed", "connection is already subscribed")
        }
        Command::Health => Response::data(serde_json::json!({
            "status": "ok",
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": PROTOCOL_VERSION,
            "sessions": registry.session_count(),
            "subscribers": registry.hub().subscriber_count(),
            "active_connections": context.active_connections.load(Ordering::Acquire),
            "last_muted": registry.last_muted(),
        })),
    }
}

fn registry_error(err: RegistryError) -> Response {
    Response::error(err.code(), err.to_string())
}

/// Reads one newline-terminated request, bounded by `MAX_REQUEST_BYTES`.
/// A final line without a newline is returned at EOF.
fn read_line<R: BufRead>(reader: &mut R) -> Result<ReadOutcome, ErrorInfo> {
    let mut line = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        };

        if available.is_empty() {
            return Ok(if line.is_empty() {
                ReadOutcome::Eof
            } else {
                ReadOutcome::Line(line)
            });
        }

        let (complete, used) = match available.iter().position(|b| *b == b'\n') {
            Some(index) => {
                line.extend_from_slice(&available[..index]);
                (true, index + 1)
            }
            None => {
                line.extend_from_slice(available);
                (false, available.len())
            }
        };
        reader.consume(used);

        if line.len() > MAX_REQUEST_BYTES {
            return Err(ErrorInfo::new(
                "request_too_large",
                "request exceeded maximum size",
            ));
        }
        if complete {
            return Ok(ReadOutcome::Line(line));
        }
    }
}

fn write_line(stream: &mut UnixStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()
}

fn write_response(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
