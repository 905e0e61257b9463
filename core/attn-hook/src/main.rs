//! attn: hook wrapper and operator CLI for the attn daemon.
//!
//! ## Subcommands
//!
//! - `_hook-state`, `_hook-stop`, `_hook-todo`: run by generated agent hooks;
//!   failures are logged and never surface to the agent
//! - `register`, `unregister`, `list`, `hooks`, `watch`, `mute`, `undo-mute`:
//!   operator commands

mod daemon_client;
mod handle;
mod logging;
mod operator;

use attn_daemon_protocol::{AgentKind, MuteKind, SessionState};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attn")]
#[command(about = "Tracks which agent sessions need attention")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report a state transition (run by hooks)
    #[command(name = "_hook-state", hide = true)]
    HookState {
        #[arg(value_name = "SESSION_ID")]
        id: String,

        #[arg(value_name = "STATE")]
        state: SessionState,
    },

    /// Report the end of a turn; reads the Stop hook payload from stdin
    #[command(name = "_hook-stop", hide = true)]
    HookStop {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },

    /// Report the todo list; reads the TodoWrite hook payload from stdin
    #[command(name = "_hook-todo", hide = true)]
    HookTodo {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },

    /// Register a session and print its id
    Register {
        /// Session id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Display label (defaults to the directory name)
        #[arg(long)]
        label: Option<String>,

        /// Working directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Agent CLI the session runs (claude, codex)
        #[arg(long, default_value = "claude", value_parser = parse_agent)]
        agent: AgentKind,
    },

    /// Remove a session
    Unregister {
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },

    /// List sessions
    List {
        /// Only sessions in this state
        #[arg(long)]
        state: Option<SessionState>,
    },

    /// Print or write the hook settings for a session
    Hooks {
        #[arg(value_name = "SESSION_ID")]
        id: String,

        #[arg(long, default_value = "claude", value_parser = parse_agent)]
        agent: AgentKind,

        /// Socket path embedded in the commands (defaults to the daemon's)
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Program the hooks invoke (defaults to this binary)
        #[arg(long)]
        wrapper: Option<String>,

        /// Write the settings to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print a shell line that unregisters the session without this binary
        #[arg(long)]
        unregister_command: bool,
    },

    /// Print broadcast events as they happen
    Watch,

    /// Toggle mute for a session or another entity
    Mute {
        #[arg(value_name = "ID")]
        id: String,

        /// session, pr, repo or author
        #[arg(long, default_value = "session")]
        kind: MuteKind,
    },

    /// Reverse the most recent mute
    UndoMute,
}

fn parse_agent(value: &str) -> Result<AgentKind, String> {
    match value {
        "claude" => Ok(AgentKind::Claude),
        "codex" => Ok(AgentKind::Codex),
        "other" => Ok(AgentKind::Other),
        other => Err(format!("unknown agent: {}", other)),
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let (name, result, from_hook) = match cli.command {
        Commands::HookState { id, state } => ("_hook-state", handle::run_state(&id, state), true),
        Commands::HookStop { id } => ("_hook-stop", handle::run_stop(&id), true),
        Commands::HookTodo { id } => ("_hook-todo", handle::run_todo(&id), true),
        Commands::Register {
            id,
            label,
            cwd,
            agent,
        } => (
            "register",
            operator::register(operator::RegisterArgs {
                id,
                label,
                cwd,
                agent,
            }),
            false,
        ),
        Commands::Unregister { id } => ("unregister", operator::unregister(&id), false),
        Commands::List { state } => ("list", operator::list(state), false),
        Commands::Hooks {
            id,
            agent,
            socket,
            wrapper,
            out,
            unregister_command,
        } => (
            "hooks",
            operator::hooks(operator::HooksArgs {
                id,
                agent,
                socket,
                wrapper,
                out,
                unregister_command,
            }),
            false,
        ),
        Commands::Watch => ("watch", operator::watch(), false),
        Commands::Mute { id, kind } => ("mute", operator::mute(&id, kind), false),
        Commands::UndoMute => ("undo-mute", operator::undo_mute(), false),
    };

    if let Err(e) = result {
        if from_hook {
            // Hooks are non-critical; the agent must keep running.
            tracing::warn!(command = name, error = %e, "attn hook failed");
            return;
        }
        tracing::error!(command = name, error = %e, "attn command failed");
        eprintln!("attn {}: {}", name, e);
        std::process::exit(1);
    }
}
