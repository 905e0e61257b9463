//! TodoWrite payload formatting.
//!
//! The agent's TodoWrite tool reports `{"todos":[{"content":..,"status":..}]}`.
//! Each item is rendered as a single display line with a status marker.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AttnError, Result};

pub const DONE_MARKER: &str = "[✓]";
pub const IN_PROGRESS_MARKER: &str = "[→]";
pub const PENDING_MARKER: &str = "[ ]";

#[derive(Debug, Clone, Deserialize)]
pub struct TodoItem {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct TodoWriteInput {
    #[serde(default)]
    todos: Vec<TodoItem>,
}

pub fn format_todo(item: &TodoItem) -> String {
    let marker = match item.status.as_str() {
        "completed" => DONE_MARKER,
        "in_progress" => IN_PROGRESS_MARKER,
        _ => PENDING_MARKER,
    };
    format!("{} {}", marker, item.content)
}

/// Formats the todos from a PostToolUse hook payload. Accepts either the whole
/// payload (`{"tool_input":{"todos":[..]}}`) or the bare tool input.
pub fn todos_from_hook_input(input: &Value) -> Result<Vec<String>> {
    let tool_input = input.get("tool_input").unwrap_or(input);
    let parsed: TodoWriteInput = serde_json::from_value(tool_input.clone())
        .map_err(|err| AttnError::MalformedTodos(err.to_string()))?;
    Ok(parsed.todos.iter().map(format_todo).collect())
}

/// A todo is pending until it carries the done marker.
pub fn is_pending(todo: &str) -> bool {
    !todo.trim_start().starts_with(DONE_MARKER)
}

pub fn pending_count(todos: &[String]) -> usize {
    todos.iter().filter(|todo| is_pending(todo)).count()
}
