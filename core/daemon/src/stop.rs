//! Stop-event resolution: decides `idle` vs `waiting_input` when a turn ends.
//!
//! Order: pending todos win outright; otherwise the last assistant message
//! (sent with the command, or read from the transcript) goes to the session
//! agent's classifier backend.
//! No text, or any classifier failure, resolves to `idle`. The result is
//! committed only if nothing else changed the session's state meanwhile.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use attn_core::todos::pending_count;
use attn_core::transcript::tail_chars;
use attn_daemon_protocol::{SessionSnapshot, SessionState, StopCommand};
use tracing::{info, warn};

use crate::classifier::ClassifierSet;
use crate::registry::{Registry, Result, StopCommit};

pub struct StopResolver {
    registry: Arc<Registry>,
    classifiers: ClassifierSet,
    timeout: Duration,
    max_message_chars: usize,
}

impl StopResolver {
    pub fn new(
        registry: Arc<Registry>,
        classifiers: ClassifierSet,
        timeout: Duration,
        max_message_chars: usize,
    ) -> Self {
        Self {
            registry,
            classifiers,
            timeout,
            max_message_chars,
        }
    }

    /// Resolves and commits the stop; returns the state in effect afterwards.
    pub fn resolve(&self, stop: &StopCommand) -> Result<SessionState> {
        let started = Instant::now();
        let ticket = self.registry.begin_stop(&stop.id)?;
        let (resolved, reason) = self.decide(&ticket.session, stop);
        let outcome = self.registry.commit_stop(&ticket, resolved)?;

        info!(
            session_id = %stop.id,
            resolved = %resolved,
            reason,
            superseded = matches!(outcome, StopCommit::Superseded(_)),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stop resolved"
        );
        Ok(outcome.state())
    }

    fn decide(&self, session: &SessionSnapshot, stop: &StopCommand) -> (SessionState, &'static str) {
        if pending_count(&session.todos) > 0 {
            return (SessionState::WaitingInput, "pending_todos");
        }

        let Some(text) = self.last_message(session, stop) else {
            return (SessionState::Idle, "no_message");
        };

        let classifier = self.classifiers.for_agent(session.agent);
        match classifier.classify(&text, self.timeout) {
            Ok(verdict) => (verdict.state(), "classified"),
            Err(err) => {
                warn!(
                    session_id = %session.id,
                    agent = %session.agent,
                    error = %err,
                    "Classifier failed; defaulting to idle"
                );
                (SessionState::Idle, "classifier_fallback")
            }
        }
    }

    fn last_message(&self, session: &SessionSnapshot, stop: &StopCommand) -> Option<String> {
        let text = match stop.message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => Some(message.to_string()),
            _ => self.transcript_message(session, stop.transcript_path.as_deref()?),
        }?;
        let text = tail_chars(text.trim(), self.max_message_chars);
        (!text.is_empty()).then_some(text)
    }

    fn transcript_message(&self, session: &SessionSnapshot, path: &str) -> Option<String> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let source = attn_core::driver_for(session.agent).transcript()?;
        match source.last_assistant_message(Path::new(path), self.max_message_chars) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    session_id = %session.id,
                    path = %path,
                    error = %err,
                    "Failed to read transcript"
                );
                None
            }
        }
    }
}
