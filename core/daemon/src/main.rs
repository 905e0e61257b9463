//! attn daemon entrypoint.
//!
//! A long-lived local service that owns the session registry. Agent hooks send
//! one-line JSON commands over a Unix socket; observers subscribe on the same
//! socket and receive every committed change. State is in memory only.

use fs_err as fs;
use std::env;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod broadcast;
mod classifier;
mod config;
mod registry;
mod server;
mod stop;

use broadcast::Hub;
use config::DaemonConfig;
use registry::Registry;
use server::ServerContext;
use stop::StopResolver;

const SOCKET_DIR_MODE: u32 = 0o700;
const SOCKET_MODE: u32 = 0o600;

fn main() {
    init_logging();

    let config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            DaemonConfig::default()
        }
    };

    let socket_path = match attn_core::paths::socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_stale_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Cannot take over daemon socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };
    if let Err(err) = fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
    {
        warn!(error = %err, "Failed to restrict socket permissions");
    }

    let hub = Arc::new(Hub::new(
        config.broadcast.queue_capacity,
        config.broadcast.max_subscribers,
    ));
    let registry = Arc::new(Registry::new(hub));
    let resolver = StopResolver::new(
        Arc::clone(&registry),
        classifier::from_config(&config.classifier),
        config.classifier.timeout(),
        config.classifier.max_message_chars,
    );
    let context = Arc::new(ServerContext::new(
        registry,
        resolver,
        config.server.clone(),
    ));

    info!(
        path = %socket_path.display(),
        classifier_enabled = config.classifier.enabled,
        classifier_default_program = %config.classifier.program,
        classifier_overrides = config.classifier.agents.len(),
        classifier_timeout_secs = config.classifier.timeout_secs,
        max_connections = config.server.max_connections,
        "attn daemon started"
    );

    server::serve(listener, context);
}

fn init_logging() {
    let debug_enabled = env::var("ATTN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    if parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent)
        .map_err(|err| format!("Failed to create socket directory: {}", err))?;
    fs::set_permissions(parent, std::fs::Permissions::from_mode(SOCKET_DIR_MODE))
        .map_err(|err| format!("Failed to restrict socket directory: {}", err))
}

/// Removes a socket file left by a dead daemon. A socket that still accepts
/// connections belongs to a live daemon and is left alone.
fn remove_stale_socket(socket_path: &Path) -> Result<(), String> {
    if !socket_path.exists() {
        return Ok(());
    }
    if UnixStream::connect(socket_path).is_ok() {
        return Err("another daemon is already listening".to_string());
    }
    fs::remove_file(socket_path).map_err(|err| format!("Failed to remove stale socket: {}", err))
}
