//! Operator commands: talk to the daemon on behalf of a person or a launcher.

use attn_daemon_protocol::{
    AgentKind, Command, MuteKind, RegisterCommand, Response, SessionSnapshot, SessionState,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::daemon_client::{self, DEFAULT_TIMEOUT};

pub struct RegisterArgs {
    pub id: Option<String>,
    pub label: Option<String>,
    pub cwd: Option<PathBuf>,
    pub agent: AgentKind,
}

pub struct HooksArgs {
    pub id: String,
    pub agent: AgentKind,
    pub socket: Option<PathBuf>,
    pub wrapper: Option<String>,
    pub out: Option<PathBuf>,
    pub unregister_command: bool,
}

pub fn register(args: RegisterArgs) -> Result<(), String> {
    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().map_err(|e| format!("Failed to read cwd: {}", e))?,
    };
    let id = args.id.unwrap_or_else(new_session_id);
    let label = args.label.unwrap_or_else(|| default_label(&cwd));
    let command = Command::Register(RegisterCommand {
        id: id.clone(),
        label,
        cwd: cwd.to_string_lossy().to_string(),
        agent: args.agent,
    });
    request(&command)?;
    println!("{}", id);
    Ok(())
}

pub fn unregister(id: &str) -> Result<(), String> {
    request(&Command::Unregister { id: id.to_string() })?;
    Ok(())
}

pub fn list(state: Option<SessionState>) -> Result<(), String> {
    let response = request(&Command::Query { state })?;
    let sessions = response.sessions.unwrap_or_default();
    let mut out = io::stdout().lock();
    for line in render_sessions(&sessions, Utc::now()) {
        writeln!(out, "{}", line).map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub fn hooks(args: HooksArgs) -> Result<(), String> {
    let socket = match args.socket {
        Some(socket) => socket,
        None => attn_core::paths::socket_path().map_err(|e| e.to_string())?,
    };
    if args.unregister_command {
        println!("{}", attn_core::hooks::unregister_command(&args.id, &socket));
        return Ok(());
    }

    let driver = attn_core::driver_for(args.agent);
    let provider = driver
        .hooks()
        .ok_or_else(|| format!("{} has no hook support", driver.display_name()))?;
    let wrapper = match args.wrapper {
        Some(wrapper) => wrapper,
        None => default_wrapper(),
    };
    let settings = provider.hook_settings(&args.id, &socket, &wrapper);

    match args.out {
        Some(path) => {
            settings.write_atomic(&path).map_err(|e| e.to_string())?;
            tracing::info!(session_id = %args.id, path = %path.display(), "Wrote hook settings");
        }
        None => println!("{}", settings.to_json_pretty().map_err(|e| e.to_string())?),
    }
    Ok(())
}

/// Prints every broadcast line until the daemon goes away.
pub fn watch() -> Result<(), String> {
    let reader = daemon_client::subscribe().map_err(|e| e.to_string())?;
    let mut out = io::stdout().lock();
    for line in reader.lines() {
        let line = line.map_err(|e| format!("Lost daemon connection: {}", e))?;
        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
            break;
        }
    }
    Ok(())
}

pub fn mute(id: &str, kind: MuteKind) -> Result<(), String> {
    let response = request(&Command::Mute {
        id: id.to_string(),
        kind,
    })?;
    let muted = response.muted.unwrap_or(false);
    println!("{} {} {}", if muted { "muted" } else { "unmuted" }, kind.as_str(), id);
    Ok(())
}

pub fn undo_mute() -> Result<(), String> {
    request(&Command::UndoMute)?;
    println!("undone");
    Ok(())
}

fn request(command: &Command) -> Result<Response, String> {
    let response = daemon_client::send(command, DEFAULT_TIMEOUT).map_err(|e| e.to_string())?;
    if response.ok {
        Ok(response)
    } else {
        Err(response
            .error
            .unwrap_or_else(|| "Unknown daemon error".to_string()))
    }
}

fn new_session_id() -> String {
    let rand = rand::thread_rng().next_u32();
    format!("attn-{}-{:08x}", Utc::now().timestamp_millis(), rand)
}

fn default_label(cwd: &Path) -> String {
    cwd.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// The generated hooks call back into this binary when it can be located.
fn default_wrapper() -> String {
    std::env::current_exe()
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|_| attn_core::hooks::DEFAULT_WRAPPER.to_string())
}

fn render_sessions(sessions: &[SessionSnapshot], now: DateTime<Utc>) -> Vec<String> {
    sessions
        .iter()
        .map(|session| {
            format!(
                "{:<24} {:<16} {:<7} {:>5} {}{} {}",
                session.id,
                session.state.as_str(),
                session.agent.as_str(),
                format_age(now - session.last_updated_at),
                if session.muted { "[muted] " } else { "" },
                session.label,
                session.cwd
            )
        })
        .collect()
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}
