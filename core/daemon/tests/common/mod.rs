//! Helpers for tests that spawn the real daemon binary against a temp HOME.

#![allow(dead_code)]

use attn_daemon_protocol::Response;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const CLASSIFIER_OFF: &str = "[classifier]\nenabled = false\n";

pub struct DaemonGuard {
    pub child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub struct TestDaemon {
    pub home: TempDir,
    pub socket: PathBuf,
    pub guard: DaemonGuard,
}

impl TestDaemon {
    /// Starts a daemon with `config` as its `config.toml`. Returns `None` when
    /// the environment does not allow binding Unix sockets.
    pub fn start(prefix: &str, config: &str) -> Option<Self> {
        let home = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in("/tmp")
            .expect("failed to create temp HOME");
        if !can_bind_socket(home.path()) {
            eprintln!("Skipping: unix socket binding not permitted in this environment.");
            return None;
        }

        let attn_dir = home.path().join(".attn");
        std::fs::create_dir_all(&attn_dir).expect("create attn dir");
        std::fs::write(attn_dir.join("config.toml"), config).expect("write config");

        let socket = socket_path(home.path());
        let child = spawn_daemon(home.path());
        let guard = DaemonGuard { child };
        wait_for_socket(&socket, Duration::from_secs(5));
        Some(Self {
            home,
            socket,
            guard,
        })
    }

    pub fn client(&self) -> Client {
        Client::connect(&self.socket)
    }

    pub fn request(&self, request: Value) -> Response {
        self.client().request(request)
    }
}

pub fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_attn-daemon"))
        .env("HOME", home)
        .env_remove("ATTN_SOCKET_PATH")
        .env_remove("ATTN_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn attn-daemon")
}

pub fn socket_path(home: &Path) -> PathBuf {
    home.join(".attn").join("attn.sock")
}

pub fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = std::fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

pub fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

/// One connection; requests and replies are matched by order.
pub struct Client {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Client {
    pub fn connect(socket: &Path) -> Self {
        let writer = UnixStream::connect(socket).expect("failed to connect to daemon socket");
        writer
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("set read timeout");
        let reader = BufReader::new(writer.try_clone().expect("clone stream"));
        Self { writer, reader }
    }

    pub fn send_raw(&mut self, payload: &[u8]) {
        self.writer
            .write_all(payload)
            .expect("failed to write payload");
        self.writer.flush().expect("failed to flush payload");
    }

    pub fn send(&mut self, request: &Value) {
        let mut line = serde_json::to_vec(request).expect("serialize request");
        line.push(b'\n');
        self.send_raw(&line);
    }

    pub fn request(&mut self, request: Value) -> Response {
        self.send(&request);
        self.read_response()
    }

    pub fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end().to_string()),
            Err(err) => panic!("failed to read from daemon: {}", err),
        }
    }

    pub fn read_value(&mut self) -> Value {
        let line = self.read_line().expect("connection closed before a line arrived");
        serde_json::from_str(&line).expect("failed to parse line JSON")
    }

    pub fn read_response(&mut self) -> Response {
        let line = self.read_line().expect("connection closed before a reply arrived");
        serde_json::from_str(&line).expect("failed to parse response JSON")
    }

    pub fn subscribe(socket: &Path) -> (Self, Value) {
        let mut client = Self::connect(socket);
        client.send(&serde_json::json!({"cmd": "subscribe"}));
        let initial = client.read_value();
        assert_eq!(initial["event"], "initial_state");
        (client, initial)
    }
}

pub fn register(daemon: &TestDaemon, id: &str) {
    let response = daemon.request(serde_json::json!({
        "cmd": "register", "id": id, "label": "t", "cwd": "/tmp"
    }));
    assert!(response.ok, "register failed: {:?}", response.error);
}

pub fn query(daemon: &TestDaemon) -> Vec<Value> {
    let response = daemon.request(serde_json::json!({"cmd": "query"}));
    assert!(response.ok, "query failed: {:?}", response.error);
    response
        .sessions
        .unwrap_or_default()
        .into_iter()
        .map(|session| serde_json::to_value(session).expect("session to JSON"))
        .collect()
}

pub fn find<'a>(sessions: &'a [Value], id: &str) -> Option<&'a Value> {
    sessions.iter().find(|session| session["id"] == id)
}
