//! # attn-core
//!
//! Shared logic for the attn daemon and its hook wrapper:
//!
//! - **Agent drivers** with optional capabilities (hook generation, transcript reading,
//!   stop classification).
//! - **Hook configuration** generation for an agent CLI, pointing at the control socket.
//! - **Transcript extraction** of the last assistant message for stop classification.
//! - **Todo formatting** for TodoWrite tool payloads.
//! - **Paths** under `~/.attn/`, with environment overrides.
//!
//! Everything here is synchronous and free of daemon state so both binaries can
//! call it directly.

pub mod agents;
pub mod error;
pub mod hooks;
pub mod paths;
pub mod todos;
pub mod transcript;

pub use agents::{
    driver_for, AgentDriver, ClassifierCommand, ClassifierProvider, HookProvider,
    TranscriptSource,
};
pub use error::{AttnError, Result};
pub use hooks::{shell_quote, HookSettings};
