//! Agent drivers and their optional capabilities.
//!
//! Every driver answers the core questions (which agent, how to display it).
//! Hook generation, transcript reading and stop classification are separate
//! capability traits; a driver that lacks one returns `None` from the accessor,
//! so callers branch on the capability and never on the concrete agent.

mod claude;
mod codex;

use std::path::Path;

use attn_daemon_protocol::AgentKind;

use crate::error::Result;
use crate::hooks::HookSettings;

pub use claude::ClaudeDriver;
pub use codex::CodexDriver;

pub trait AgentDriver: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Human-readable name (e.g., "Claude Code", "OpenAI Codex")
    fn display_name(&self) -> &'static str;

    /// Hook configuration support, if the agent CLI has lifecycle hooks.
    fn hooks(&self) -> Option<&dyn HookProvider> {
        None
    }

    /// Transcript reading support, if the agent writes a readable transcript.
    fn transcript(&self) -> Option<&dyn TranscriptSource> {
        None
    }

    /// The agent's own CLI as a stop classifier, if it can answer a one-shot prompt.
    fn classifier(&self) -> Option<&dyn ClassifierProvider> {
        None
    }
}

pub trait HookProvider: Send + Sync {
    fn hook_settings(&self, session_id: &str, socket_path: &Path, wrapper: &str) -> HookSettings;
}

pub trait TranscriptSource: Send + Sync {
    /// Tail of the last assistant message after the latest user turn, or
    /// `None` when the current turn has no reply yet.
    fn last_assistant_message(&self, path: &Path, max_chars: usize) -> Result<Option<String>>;
}

/// Argument replaced by the classifier prompt. Without it the prompt goes to stdin.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// A one-shot command line that prints a verdict for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierCommand {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

pub trait ClassifierProvider: Send + Sync {
    fn classifier_command(&self) -> ClassifierCommand;
}

/// Driver for agents attn has no integration for: no hooks, no transcript.
pub struct OtherDriver;

impl AgentDriver for OtherDriver {
    fn kind(&self) -> AgentKind {
        AgentKind::Other
    }

    fn display_name(&self) -> &'static str {
        "Other agent"
    }
}

pub fn driver_for(kind: AgentKind) -> &'static dyn AgentDriver {
    match kind {
        AgentKind::Claude => &ClaudeDriver,
        AgentKind::Codex => &CodexDriver,
        AgentKind::Other => &OtherDriver,
    }
}
