//! Claude Code driver: lifecycle hooks, JSONL transcripts and `claude -p` classification.

use std::path::Path;

use attn_daemon_protocol::AgentKind;

use super::{AgentDriver, ClassifierCommand, ClassifierProvider, HookProvider, TranscriptSource};
use crate::error::Result;
use crate::hooks::{self, HookSettings};
use crate::transcript::{self, TranscriptFormat};

pub struct ClaudeDriver;

impl AgentDriver for ClaudeDriver {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn hooks(&self) -> Option<&dyn HookProvider> {
        Some(self)
    }

    fn transcript(&self) -> Option<&dyn TranscriptSource> {
        Some(self)
    }

    fn classifier(&self) -> Option<&dyn ClassifierProvider> {
        Some(self)
    }
}

impl HookProvider for ClaudeDriver {
    fn hook_settings(&self, session_id: &str, socket_path: &Path, wrapper: &str) -> HookSettings {
        hooks::generate(session_id, socket_path, wrapper)
    }
}

impl TranscriptSource for ClaudeDriver {
    fn last_assistant_message(&self, path: &Path, max_chars: usize) -> Result<Option<String>> {
        transcript::last_assistant_message(path, TranscriptFormat::Claude, max_chars)
    }
}

impl ClassifierProvider for ClaudeDriver {
    fn classifier_command(&self) -> ClassifierCommand {
        ClassifierCommand {
            program: "claude",
            args: &["-p", "--model", "haiku", "--output-format", "text"],
        }
    }
}
