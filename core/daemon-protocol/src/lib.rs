//! Control-socket protocol types and validation for attn-daemon.
//!
//! This crate is shared by the daemon, the hook wrapper and observer clients to
//! prevent schema drift. The daemon remains the authority on validation, but
//! clients reuse the same types to construct valid commands.
//!
//! The wire format is one JSON object per line. Requests carry a `cmd`
//! discriminant; replies carry `ok`; broadcast lines carry `event`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SESSION_ID_LEN: usize = 256;

pub const ERROR_UNKNOWN_SESSION: &str = "unknown_session";
pub const ERROR_TOO_MANY_CONNECTIONS: &str = "too_many_connections";

/// Every `cmd` value the daemon understands. Checked before field decoding so an
/// unrecognized command is reported as such instead of as a field error.
pub const KNOWN_COMMANDS: [&str; 12] = [
    "register",
    "unregister",
    "state",
    "stop",
    "todos",
    "query",
    "heartbeat",
    "mute",
    "undo_mute",
    "clear_last_muted",
    "subscribe",
    "health",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Working,
    Idle,
    WaitingInput,
    PendingApproval,
}

impl SessionState {
    pub const ALL: [SessionState; 4] = [
        SessionState::Working,
        SessionState::Idle,
        SessionState::WaitingInput,
        SessionState::PendingApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Working => "working",
            SessionState::Idle => "idle",
            SessionState::WaitingInput => "waiting_input",
            SessionState::PendingApproval => "pending_approval",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SessionState::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| format!("invalid state: {}", value))
    }
}

/// Which agent CLI a session runs. Unknown tags decode as `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Claude,
    Codex,
    #[serde(other)]
    Other,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Other => "other",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteKind {
    #[default]
    Session,
    Pr,
    Repo,
    Author,
}

impl MuteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MuteKind::Session => "session",
            MuteKind::Pr => "pr",
            MuteKind::Repo => "repo",
            MuteKind::Author => "author",
        }
    }
}

impl FromStr for MuteKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "session" => Ok(MuteKind::Session),
            "pr" => Ok(MuteKind::Pr),
            "repo" => Ok(MuteKind::Repo),
            "author" => Ok(MuteKind::Author),
            other => Err(format!("invalid mute kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCommand {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(alias = "dir")]
    pub cwd: String,
    #[serde(default, alias = "agent_type")]
    pub agent: AgentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCommand {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A decoded control-socket command. Each variant carries only its own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Register(RegisterCommand),
    Unregister {
        id: String,
    },
    State {
        id: String,
        state: SessionState,
    },
    Stop(StopCommand),
    Todos {
        id: String,
        todos: Vec<String>,
    },
    Query {
        #[serde(
            default,
            alias = "filter",
            deserialize_with = "empty_state_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        state: Option<SessionState>,
    },
    Heartbeat {
        id: String,
    },
    Mute {
        id: String,
        #[serde(default)]
        kind: MuteKind,
    },
    UndoMute,
    ClearLastMuted,
    Subscribe,
    Health,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register(_) => "register",
            Command::Unregister { .. } => "unregister",
            Command::State { .. } => "state",
            Command::Stop(_) => "stop",
            Command::Todos { .. } => "todos",
            Command::Query { .. } => "query",
            Command::Heartbeat { .. } => "heartbeat",
            Command::Mute { .. } => "mute",
            Command::UndoMute => "undo_mute",
            Command::ClearLastMuted => "clear_last_muted",
            Command::Subscribe => "subscribe",
            Command::Health => "health",
        }
    }

    /// The session (or muted entity) id this command targets, if any.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Command::Register(register) => Some(&register.id),
            Command::Stop(stop) => Some(&stop.id),
            Command::Unregister { id }
            | Command::State { id, .. }
            | Command::Todos { id, .. }
            | Command::Heartbeat { id }
            | Command::Mute { id, .. } => Some(id),
            Command::Query { .. }
            | Command::UndoMute
            | Command::ClearLastMuted
            | Command::Subscribe
            | Command::Health => None,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(id) = self.target_id() {
            require_id(id)?;
        }
        if let Command::Register(register) = self {
            if register.cwd.trim().is_empty() {
                return Err(ErrorInfo::new("missing_field", "cwd is required"));
            }
        }
        Ok(())
    }

    /// Serializes the command as a single wire line (without the newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decodes one request line: the `cmd` discriminant is inspected first, then
/// the matching variant is decoded and validated.
pub fn parse_command(bytes: &[u8]) -> Result<Command, ErrorInfo> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })?;

    if !value.is_object() {
        return Err(ErrorInfo::new(
            "invalid_json",
            "request must be a JSON object",
        ));
    }

    let cmd = match value.get("cmd") {
        Some(Value::String(cmd)) => cmd.clone(),
        Some(_) => return Err(ErrorInfo::new("invalid_params", "cmd must be a string")),
        None => return Err(ErrorInfo::new("missing_cmd", "cmd is required")),
    };

    if !KNOWN_COMMANDS.contains(&cmd.as_str()) {
        return Err(ErrorInfo::new(
            "unknown_command",
            format!("unknown command: {}", cmd),
        ));
    }

    let command: Command = serde_json::from_value(value).map_err(|err| {
        ErrorInfo::new("invalid_params", format!("invalid {} command: {}", cmd, err))
    })?;
    command.validate()?;
    Ok(command)
}

fn require_id(id: &str) -> Result<(), ErrorInfo> {
    if id.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "id is required"));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_id",
            format!("id must be {} characters or fewer", MAX_SESSION_ID_LEN),
        ));
    }
    Ok(())
}

fn empty_state_as_none<'de, D>(deserializer: D) -> Result<Option<SessionState>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Reply to a single request line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn sessions(sessions: Vec<SessionSnapshot>) -> Self {
        Self {
            ok: true,
            sessions: Some(sessions),
            ..Self::default()
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(ErrorInfo::new(code, message))
    }

    pub fn error_with_info(error: ErrorInfo) -> Self {
        Self {
            ok: false,
            error: Some(error.message),
            code: Some(error.code),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = Some(muted);
        self
    }
}

/// Point-in-time copy of one tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub label: String,
    pub cwd: String,
    pub agent: AgentKind,
    pub state: SessionState,
    #[serde(default)]
    pub todos: Vec<String>,
    #[serde(default)]
    pub muted: bool,
    pub registered_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRecord {
    pub kind: MuteKind,
    pub id: String,
    pub muted_at: DateTime<Utc>,
}

/// One line pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BroadcastEvent {
    InitialState {
        sessions: Vec<SessionSnapshot>,
        last_muted: Option<MuteRecord>,
    },
    SessionAdded {
        session: SessionSnapshot,
        replaced: bool,
    },
    SessionRemoved {
        id: String,
    },
    StateChanged {
        id: String,
        old_state: SessionState,
        new_state: SessionState,
        session: SessionSnapshot,
    },
    TodosChanged {
        id: String,
        todos: Vec<String>,
    },
    MuteChanged {
        kind: MuteKind,
        id: String,
        muted: bool,
    },
}

impl BroadcastEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastEvent::InitialState { .. } => "initial_state",
            BroadcastEvent::SessionAdded { .. } => "session_added",
            BroadcastEvent::SessionRemoved { .. } => "session_removed",
            BroadcastEvent::StateChanged { .. } => "state_changed",
            BroadcastEvent::TodosChanged { .. } => "todos_changed",
            BroadcastEvent::MuteChanged { .. } => "mute_changed",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            BroadcastEvent::InitialState { .. } => None,
            BroadcastEvent::SessionAdded { session, .. } => Some(&session.id),
            BroadcastEvent::SessionRemoved { id }
            | BroadcastEvent::StateChanged { id, .. }
            | BroadcastEvent::TodosChanged { id, .. }
            | BroadcastEvent::MuteChanged { id, .. } => Some(id),
        }
    }
}
