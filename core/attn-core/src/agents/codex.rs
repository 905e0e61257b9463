//! Codex driver. Codex has no hook mechanism attn can configure; it offers
//! transcript reading and classification through `codex exec`.

use std::path::Path;

use attn_daemon_protocol::AgentKind;

use super::{
    AgentDriver, ClassifierCommand, ClassifierProvider, TranscriptSource, PROMPT_PLACEHOLDER,
};
use crate::error::Result;
use crate::transcript::{self, TranscriptFormat};

pub struct CodexDriver;

impl AgentDriver for CodexDriver {
    fn kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn display_name(&self) -> &'static str {
        "OpenAI Codex"
    }

    fn transcript(&self) -> Option<&dyn TranscriptSource> {
        Some(self)
    }

    fn classifier(&self) -> Option<&dyn ClassifierProvider> {
        Some(self)
    }
}

impl TranscriptSource for CodexDriver {
    fn last_assistant_message(&self, path: &Path, max_chars: usize) -> Result<Option<String>> {
        transcript::last_assistant_message(path, TranscriptFormat::Codex, max_chars)
    }
}

impl ClassifierProvider for CodexDriver {
    fn classifier_command(&self) -> ClassifierCommand {
        ClassifierCommand {
            program: "codex",
            args: &["exec", "--skip-git-repo-check", PROMPT_PLACEHOLDER],
        }
    }
}
