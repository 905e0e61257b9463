//! The session registry: the daemon's single shared mutable store.
//!
//! All reads and writes go through one mutex. Mutations publish their event to
//! the broadcast hub before the lock is released, so every observer sees events
//! in commit order and a new subscriber's snapshot lines up exactly with the
//! first event it receives. Lock order is always registry, then hub.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use attn_daemon_protocol::{
    BroadcastEvent, MuteKind, MuteRecord, RegisterCommand, SessionSnapshot, SessionState,
    ERROR_UNKNOWN_SESSION,
};
use chrono::Utc;
use tracing::{debug, info};

use crate::broadcast::{Hub, HubError, Subscription};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error(transparent)]
    Subscribe(#[from] HubError),
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::UnknownSession(_) => ERROR_UNKNOWN_SESSION,
            RegistryError::NothingToUndo => "nothing_to_undo",
            RegistryError::Subscribe(HubError::TooManySubscribers { .. }) => "too_many_subscribers",
            RegistryError::Subscribe(HubError::Serialize(_)) => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Snapshot plus the state revision it was taken at; handed out when a stop
/// starts so the result can be checked against later commits.
#[derive(Debug, Clone)]
pub struct StopTicket {
    pub session: SessionSnapshot,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCommit {
    Committed(SessionState),
    /// Another state change landed first; carries the state now in effect.
    Superseded(SessionState),
}

impl StopCommit {
    pub fn state(&self) -> SessionState {
        match self {
            StopCommit::Committed(state) | StopCommit::Superseded(state) => *state,
        }
    }
}

struct Entry {
    session: SessionSnapshot,
    revision: u64,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    muted_entities: HashSet<(MuteKind, String)>,
    last_muted: Option<MuteRecord>,
    next_revision: u64,
}

impl Inner {
    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut Entry> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))
    }

    fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .sessions
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    fn is_muted(&self, kind: MuteKind, id: &str) -> bool {
        match kind {
            MuteKind::Session => self
                .sessions
                .get(id)
                .map(|entry| entry.session.muted)
                .unwrap_or(false),
            _ => self.muted_entities.contains(&(kind, id.to_string())),
        }
    }

    /// Applies a mute flag; returns false when the target session is gone.
    fn apply_mute(&mut self, kind: MuteKind, id: &str, muted: bool) -> bool {
        match kind {
            MuteKind::Session => match self.sessions.get_mut(id) {
                Some(entry) => {
                    entry.session.muted = muted;
                    true
                }
                None => false,
            },
            _ => {
                let key = (kind, id.to_string());
                if muted {
                    self.muted_entities.insert(key);
                } else {
                    self.muted_entities.remove(&key);
                }
                true
            }
        }
    }
}

pub struct Registry {
    inner: Mutex<Inner>,
    hub: Arc<Hub>,
}

impl Registry {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            hub,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Creates the session, or resets an existing one with the same id.
    pub fn register(&self, command: RegisterCommand) -> SessionSnapshot {
        let now = Utc::now();
        let mut inner = self.lock();
        let revision = inner.bump_revision();
        let session = SessionSnapshot {
            id: command.id,
            label: command.label,
            cwd: command.cwd,
            agent: command.agent,
            state: SessionState::Working,
            todos: Vec::new(),
            muted: false,
            registered_at: now,
            last_updated_at: now,
            last_seen_at: now,
        };
        let replaced = inner
            .sessions
            .insert(
                session.id.clone(),
                Entry {
                    session: session.clone(),
                    revision,
                },
            )
            .is_some();

        info!(
            session_id = %session.id,
            agent = %session.agent,
            replaced,
            "Session registered"
        );
        self.hub.publish(&BroadcastEvent::SessionAdded {
            session: session.clone(),
            replaced,
        });
        session
    }

    /// Removes the session. Returns false (and publishes nothing) if absent.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.sessions.remove(id).is_none() {
            debug!(session_id = %id, "Unregister for unknown session ignored");
            return false;
        }
        info!(session_id = %id, "Session unregistered");
        self.hub.publish(&BroadcastEvent::SessionRemoved { id: id.to_string() });
        true
    }

    pub fn set_state(&self, id: &str, state: SessionState) -> Result<SessionSnapshot> {
        let mut inner = self.lock();
        let revision = inner.bump_revision();
        let entry = inner.entry_mut(id)?;
        let (session, old_state) = Self::commit_state(entry, state, revision);
        self.publish_state_change(&session, old_state);
        Ok(session)
    }

    /// Captures the session and its revision at the start of stop handling.
    pub fn begin_stop(&self, id: &str) -> Result<StopTicket> {
        let inner = self.lock();
        let entry = inner
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::UnknownSession(id.to_string()))?;
        Ok(StopTicket {
            session: entry.session.clone(),
            revision: entry.revision,
        })
    }

    /// Commits a stop result unless another state change (or a re-register)
    /// happened after `ticket` was taken.
    pub fn commit_stop(&self, ticket: &StopTicket, state: SessionState) -> Result<StopCommit> {
        let id = ticket.session.id.as_str();
        let mut inner = self.lock();
        let revision = inner.bump_revision();
        let entry = inner.entry_mut(id)?;
        if entry.revision != ticket.revision {
            debug!(
                session_id = %id,
                resolved = %state,
                current = %entry.session.state,
                "Stop result superseded by a newer state"
            );
            return Ok(StopCommit::Superseded(entry.session.state));
        }
        let (session, old_state) = Self::commit_state(entry, state, revision);
        self.publish_state_change(&session, old_state);
        Ok(StopCommit::Committed(state))
    }

    pub fn set_todos(&self, id: &str, todos: Vec<String>) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.lock();
        let entry = inner.entry_mut(id)?;
        entry.session.todos = todos.clone();
        entry.session.last_updated_at = now;
        entry.session.last_seen_at = now;
        debug!(session_id = %id, count = todos.len(), "Todos updated");
        self.hub.publish(&BroadcastEvent::TodosChanged {
            id: id.to_string(),
            todos,
        });
        Ok(())
    }

    /// Refreshes `last_seen_at` only; not broadcast.
    pub fn touch(&self, id: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.entry_mut(id)?;
        entry.session.last_seen_at = Utc::now();
        Ok(())
    }

    pub fn query(&self, filter: Option<SessionState>) -> Vec<SessionSnapshot> {
        let mut sessions = self.lock().snapshots();
        if let Some(state) = filter {
            sessions.retain(|session| session.state == state);
        }
        sessions
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.lock()
            .sessions
            .get(id)
            .map(|entry| entry.session.clone())
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Toggles the mute flag on an entity and returns the new value. Muting
    /// records the entity as the single-step undo target.
    pub fn mute(&self, kind: MuteKind, id: &str) -> Result<bool> {
        let mut inner = self.lock();
        let muted = !inner.is_muted(kind, id);
        if !inner.apply_mute(kind, id, muted) {
            return Err(RegistryError::UnknownSession(id.to_string()));
        }

        if muted {
            inner.last_muted = Some(MuteRecord {
                kind,
                id: id.to_string(),
                muted_at: Utc::now(),
            });
        } else if inner
            .last_muted
            .as_ref()
            .is_some_and(|record| record.kind == kind && record.id == id)
        {
            inner.last_muted = None;
        }

        info!(kind = kind.as_str(), id = %id, muted, "Mute toggled");
        self.hub.publish(&BroadcastEvent::MuteChanged {
            kind,
            id: id.to_string(),
            muted,
        });
        Ok(muted)
    }

    /// Reverses the most recent mute and clears the undo record.
    pub fn undo_mute(&self) -> Result<MuteRecord> {
        let mut inner = self.lock();
        let record = inner.last_muted.take().ok_or(RegistryError::NothingToUndo)?;
        if inner.apply_mute(record.kind, &record.id, false) {
            info!(kind = record.kind.as_str(), id = %record.id, "Mute undone");
            self.hub.publish(&BroadcastEvent::MuteChanged {
                kind: record.kind,
                id: record.id.clone(),
                muted: false,
            });
        }
        Ok(record)
    }

    /// Forgets the undo record without touching the mute itself.
    pub fn clear_last_muted(&self) {
        self.lock().last_muted = None;
    }

    pub fn last_muted(&self) -> Option<MuteRecord> {
        self.lock().last_muted.clone()
    }

    /// Registers an observer. The snapshot in its `initial_state` line and its
    /// registration happen under the registry lock, so no commit can fall
    /// between them.
    pub fn subscribe(&self) -> Result<Subscription> {
        let inner = self.lock();
        let initial = BroadcastEvent::InitialState {
            sessions: inner.snapshots(),
            last_muted: inner.last_muted.clone(),
        };
        Ok(self.hub.subscribe(&initial)?)
    }

    fn commit_state(
        entry: &mut Entry,
        state: SessionState,
        revision: u64,
    ) -> (SessionSnapshot, SessionState) {
        let now = Utc::now();
        let old_state = entry.session.state;
        entry.session.state = state;
        entry.session.last_updated_at = now;
        entry.session.last_seen_at = now;
        entry.revision = revision;
        (entry.session.clone(), old_state)
    }

    fn publish_state_change(&self, session: &SessionSnapshot, old_state: SessionState) {
        info!(
            session_id = %session.id,
            old_state = %old_state,
            new_state = %session.state,
            "Session state changed"
        );
        self.hub.publish(&BroadcastEvent::StateChanged {
            id: session.id.clone(),
            old_state,
            new_state: session.state,
            session: session.clone(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
