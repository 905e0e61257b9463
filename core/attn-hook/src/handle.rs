//! Handlers for the commands generated hooks run.
//!
//! ```text
//! _hook-state <id> <state>  → state
//! _hook-stop <id>           → stop   (skipped when stop_hook_active=true)
//! _hook-todo <id>           → todos  (TodoWrite tool input on stdin)
//! ```
//!
//! Hooks must never block or fail the agent: callers log errors and exit 0.

use attn_daemon_protocol::{Command, SessionState, StopCommand};
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read};
use std::time::Duration;

use crate::daemon_client::{self, DEFAULT_TIMEOUT, STOP_TIMEOUT};

const MAX_STDIN_BYTES: u64 = 1024 * 1024;

/// Fields of the Stop hook payload attn cares about.
#[derive(Debug, Default, Deserialize)]
struct StopHookInput {
    #[serde(default)]
    transcript_path: Option<String>,
    #[serde(default)]
    stop_hook_active: bool,
}

pub fn run_state(id: &str, state: SessionState) -> Result<(), String> {
    let command = Command::State {
        id: id.to_string(),
        state,
    };
    deliver(&command, DEFAULT_TIMEOUT)
}

pub fn run_stop(id: &str) -> Result<(), String> {
    let input = read_stdin()?;
    match stop_command(id, &input)? {
        Some(command) => deliver(&command, STOP_TIMEOUT),
        None => {
            tracing::debug!(session_id = %id, "Skipping re-entrant stop");
            Ok(())
        }
    }
}

pub fn run_todo(id: &str) -> Result<(), String> {
    let input = read_stdin()?;
    deliver(&todos_command(id, &input)?, DEFAULT_TIMEOUT)
}

fn deliver(command: &Command, timeout: Duration) -> Result<(), String> {
    let response =
        daemon_client::send_with_retry(command, timeout).map_err(|err| err.to_string())?;
    if response.ok {
        tracing::debug!(
            cmd = command.name(),
            session_id = ?command.target_id(),
            state = ?response.state,
            "Daemon accepted command"
        );
        Ok(())
    } else {
        Err(format!(
            "{}: {}",
            response.code.unwrap_or_default(),
            response.error.unwrap_or_else(|| "Unknown daemon error".to_string())
        ))
    }
}

fn read_stdin() -> Result<String, String> {
    let mut input = String::new();
    io::stdin()
        .take(MAX_STDIN_BYTES)
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;
    Ok(input)
}

/// Builds the `stop` command, or `None` when the agent is already continuing
/// because of a previous Stop hook.
fn stop_command(id: &str, input: &str) -> Result<Option<Command>, String> {
    let hook_input: StopHookInput = if input.trim().is_empty() {
        StopHookInput::default()
    } else {
        serde_json::from_str(input).map_err(|e| format!("Failed to parse hook input: {}", e))?
    };
    if hook_input.stop_hook_active {
        return Ok(None);
    }
    let transcript_path = hook_input
        .transcript_path
        .filter(|path| !path.trim().is_empty());
    Ok(Some(Command::Stop(StopCommand {
        id: id.to_string(),
        transcript_path,
        message: None,
    })))
}

fn todos_command(id: &str, input: &str) -> Result<Command, String> {
    let value: Value =
        serde_json::from_str(input).map_err(|e| format!("Failed to parse hook input: {}", e))?;
    let todos = attn_core::todos::todos_from_hook_input(&value).map_err(|e| e.to_string())?;
    Ok(Command::Todos {
        id: id.to_string(),
        todos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_forwards_transcript_path() {
        let command = stop_command(
            "s1",
            r#"{"session_id":"x","transcript_path":"/tmp/t.jsonl","stop_hook_active":false}"#,
        )
        .unwrap()
        .unwrap();
        let Command::Stop(stop) = command else {
            panic!("expected stop command");
        };
        assert_eq!(stop.id, "s1");
        assert_eq!(stop.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
        assert!(stop.message.is_none());
    }

    #[test]
    fn active_stop_hook_is_skipped() {
        let command = stop_command("s1", r#"{"stop_hook_active":true}"#).unwrap();
        assert!(command.is_none());
    }

    #[test]
    fn empty_stop_input_still_stops() {
        let command = stop_command("s1", "  \n").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Stop(StopCommand {
                id: "s1".to_string(),
                transcript_path: None,
                message: None,
            })
        );
        assert!(stop_command("s1", "{not json").is_err());
    }

    #[test]
    fn todo_write_input_becomes_marked_todos() {
        let input = r#"{
            "tool_name": "TodoWrite",
            "tool_input": {"todos": [
                {"content": "Write tests", "status": "completed"},
                {"content": "Fix bug", "status": "in_progress"},
                {"content": "Ship", "status": "pending"}
            ]}
        }"#;
        let command = todos_command("s1", input).unwrap();
        assert_eq!(
            command,
            Command::Todos {
                id: "s1".to_string(),
                todos: vec![
                    "[✓] Write tests".to_string(),
                    "[→] Fix bug".to_string(),
                    "[ ] Ship".to_string(),
                ],
            }
        );
    }

    #[test]
    fn malformed_todo_input_is_an_error() {
        assert!(todos_command("s1", r#"{"tool_input": {"todos": "nope"}}"#).is_err());
    }
}
