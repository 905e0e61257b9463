//! Last-assistant-message extraction from agent JSONL transcripts.
//!
//! Supported line shapes:
//! - Claude: `{"type":"assistant","message":{"role":"assistant","content":...}}`
//!   where content is a string or a list of `text` blocks.
//! - Codex: `{"type":"event_msg","payload":{"type":"agent_message","message":...}}`
//!   and `{"type":"response_item","payload":{"type":"message","role":"assistant",
//!   "content":[{"type":"output_text","text":...}]}}`.
//!
//! Only an assistant message that follows the latest user entry counts; a turn
//! whose reply has not been flushed yet yields `None`.

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use crate::error::{AttnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Claude,
    Codex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRole {
    User,
    Assistant,
}

/// Reads `path` and returns the tail (at most `max_chars` characters) of the
/// last assistant message after the most recent user entry.
pub fn last_assistant_message(
    path: &Path,
    format: TranscriptFormat,
    max_chars: usize,
) -> Result<Option<String>> {
    let read_failed = |source| AttnError::TranscriptRead {
        path: path.to_path_buf(),
        source,
    };
    let file = fs_err::File::open(path).map_err(read_failed)?;
    let mut reader = BufReader::new(file);

    let mut last: Option<String> = None;
    let mut skipped = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(read_failed)?;
        if read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            skipped += 1;
            continue;
        };
        match classify_line(&value, format) {
            Some((LineRole::User, _)) => last = None,
            Some((LineRole::Assistant, text)) => last = Some(text),
            None => {}
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "Skipped unparseable transcript lines");
    }
    Ok(last.map(|text| tail_chars(&text, max_chars)))
}

/// Keeps the last `max_chars` characters, respecting UTF-8 boundaries.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

fn classify_line(value: &Value, format: TranscriptFormat) -> Option<(LineRole, String)> {
    match format {
        TranscriptFormat::Claude => classify_claude(value),
        TranscriptFormat::Codex => classify_codex(value),
    }
}

fn classify_claude(value: &Value) -> Option<(LineRole, String)> {
    let entry_type = value.get("type").and_then(Value::as_str);
    let message = value.get("message");
    let role = message
        .and_then(|message| message.get("role"))
        .and_then(Value::as_str);

    if entry_type == Some("user") || role == Some("user") {
        // Tool results are written as user entries but do not start a turn.
        let content = message.and_then(|message| message.get("content"));
        if content.is_some_and(only_tool_results) {
            return None;
        }
        return Some((LineRole::User, String::new()));
    }
    if entry_type == Some("assistant") || role == Some("assistant") {
        let text = message
            .and_then(|message| message.get("content"))
            .map(text_content)
            .unwrap_or_default();
        if !text.is_empty() {
            return Some((LineRole::Assistant, text));
        }
    }
    None
}

fn classify_codex(value: &Value) -> Option<(LineRole, String)> {
    let payload = value.get("payload")?;
    let payload_type = payload.get("type").and_then(Value::as_str);

    match value.get("type").and_then(Value::as_str)? {
        "event_msg" => {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if message.is_empty() {
                return None;
            }
            match payload_type {
                Some("user_message") => Some((LineRole::User, String::new())),
                Some("agent_message") => Some((LineRole::Assistant, message.to_string())),
                _ => None,
            }
        }
        "response_item" if payload_type == Some("message") => {
            match payload.get("role").and_then(Value::as_str) {
                Some("user") => Some((LineRole::User, String::new())),
                Some("assistant") => {
                    let text = payload.get("content").map(text_content).unwrap_or_default();
                    (!text.is_empty()).then_some((LineRole::Assistant, text))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn only_tool_results(content: &Value) -> bool {
    match content {
        Value::Array(blocks) => {
            !blocks.is_empty()
                && blocks
                    .iter()
                    .all(|block| block.get("type").and_then(Value::as_str) == Some("tool_result"))
        }
        _ => false,
    }
}

fn text_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| {
                matches!(
                    block.get("type").and_then(Value::as_str),
                    Some("text") | Some("output_text")
                )
            })
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
