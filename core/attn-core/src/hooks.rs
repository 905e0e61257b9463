//! Per-session hook configuration for agent CLIs.
//!
//! The generated document maps lifecycle events to matcher/command entries. Each
//! command calls back into the `attn` wrapper with the session id, with the
//! control socket passed through `ATTN_SOCKET_PATH`. Output is a pure function of
//! its inputs: the same session, socket and wrapper always yield the same bytes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use attn_daemon_protocol::SessionState;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{AttnError, Result};
use crate::paths::SOCKET_PATH_ENV;

pub const DEFAULT_WRAPPER: &str = "attn";

pub const EVENT_STOP: &str = "Stop";
pub const EVENT_USER_PROMPT_SUBMIT: &str = "UserPromptSubmit";
pub const EVENT_PRE_TOOL_USE: &str = "PreToolUse";
pub const EVENT_POST_TOOL_USE: &str = "PostToolUse";
pub const EVENT_PERMISSION_REQUEST: &str = "PermissionRequest";

pub const MATCH_ANY: &str = "*";
pub const TOOL_ASK_USER_QUESTION: &str = "AskUserQuestion";
pub const TOOL_TODO_WRITE: &str = "TodoWrite";

/// Seconds the agent CLI waits on the stop hook. Must exceed the daemon's
/// classifier timeout so a slow classification is not cut off by the CLI.
pub const STOP_HOOK_TIMEOUT_SECS: u32 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSettings {
    pub hooks: BTreeMap<String, Vec<HookConfig>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    pub matcher: String,
    pub hooks: Vec<InnerHook>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerHook {
    #[serde(rename = "type")]
    pub hook_type: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

impl InnerHook {
    fn command(command: String) -> Self {
        Self {
            hook_type: "command".to_string(),
            command,
            timeout: None,
        }
    }

    fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout = Some(secs);
        self
    }
}

impl HookSettings {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the settings through a temp file in the target directory, then
    /// renames it into place so readers never see a partial document.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let content = self.to_json_pretty()?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let write_failed = |source| AttnError::SettingsWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        fs_err::create_dir_all(dir).map_err(write_failed)?;
        let mut temp = NamedTempFile::new_in(dir).map_err(write_failed)?;
        temp.write_all(content.as_bytes()).map_err(write_failed)?;
        temp.write_all(b"\n").map_err(write_failed)?;
        temp.flush().map_err(write_failed)?;
        temp.persist(path).map_err(|err| write_failed(err.error))?;
        Ok(())
    }
}

/// Builds the hook configuration for one session.
///
/// | Event | Matcher | Action |
/// |---|---|---|
/// | `UserPromptSubmit` | `*` | state `working` |
/// | `PreToolUse` | `AskUserQuestion` | state `waiting_input` |
/// | `PermissionRequest` | `*` | state `pending_approval` |
/// | `PostToolUse` | `TodoWrite` | todo update |
/// | `PostToolUse` | `AskUserQuestion`, `*` | state `working` |
/// | `Stop` | `*` | stop classification |
pub fn generate(session_id: &str, socket_path: &Path, wrapper: &str) -> HookSettings {
    let invoker = HookInvoker::new(session_id, socket_path, wrapper);
    let mut hooks: BTreeMap<String, Vec<HookConfig>> = BTreeMap::new();

    hooks.insert(
        EVENT_STOP.to_string(),
        vec![entry(
            MATCH_ANY,
            InnerHook::command(invoker.subcommand("_hook-stop", None))
                .with_timeout(STOP_HOOK_TIMEOUT_SECS),
        )],
    );
    hooks.insert(
        EVENT_USER_PROMPT_SUBMIT.to_string(),
        vec![entry(MATCH_ANY, invoker.state(SessionState::Working))],
    );
    hooks.insert(
        EVENT_PRE_TOOL_USE.to_string(),
        vec![entry(
            TOOL_ASK_USER_QUESTION,
            invoker.state(SessionState::WaitingInput),
        )],
    );
    hooks.insert(
        EVENT_PERMISSION_REQUEST.to_string(),
        vec![entry(MATCH_ANY, invoker.state(SessionState::PendingApproval))],
    );
    hooks.insert(
        EVENT_POST_TOOL_USE.to_string(),
        vec![
            entry(
                TOOL_TODO_WRITE,
                InnerHook::command(invoker.subcommand("_hook-todo", None)),
            ),
            entry(TOOL_ASK_USER_QUESTION, invoker.state(SessionState::Working)),
            entry(MATCH_ANY, invoker.state(SessionState::Working)),
        ],
    );

    HookSettings { hooks }
}

/// A shell line that sends a literal `unregister` command straight to the
/// socket, for cleanup paths that cannot rely on the wrapper binary.
pub fn unregister_command(session_id: &str, socket_path: &Path) -> String {
    let payload = serde_json::json!({ "cmd": "unregister", "id": session_id }).to_string();
    format!(
        "echo {} | nc -U {}",
        shell_quote(&payload),
        shell_quote(&socket_path.to_string_lossy())
    )
}

/// POSIX single-quote escaping; safe for any byte content.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn entry(matcher: &str, hook: InnerHook) -> HookConfig {
    HookConfig {
        matcher: matcher.to_string(),
        hooks: vec![hook],
    }
}

struct HookInvoker {
    prefix: String,
    session: String,
}

impl HookInvoker {
    fn new(session_id: &str, socket_path: &Path, wrapper: &str) -> Self {
        let wrapper = match wrapper.trim() {
            "" => DEFAULT_WRAPPER,
            trimmed => trimmed,
        };
        let socket = socket_path.to_string_lossy();
        Self {
            prefix: format!(
                "{}={} {}",
                SOCKET_PATH_ENV,
                shell_quote(socket.trim()),
                shell_quote(wrapper)
            ),
            session: shell_quote(session_id),
        }
    }

    fn subcommand(&self, name: &str, arg: Option<&str>) -> String {
        match arg {
            Some(arg) => format!("{} {} {} {}", self.prefix, name, self.session, arg),
            None => format!("{} {} {}", self.prefix, name, self.session),
        }
    }

    fn state(&self, state: SessionState) -> InnerHook {
        InnerHook::command(self.subcommand("_hook-state", Some(state.as_str())))
    }
}
