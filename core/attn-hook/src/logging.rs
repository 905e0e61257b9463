//! File logging for the hook CLI.
//!
//! Hooks run inside the agent CLI, so nothing goes to stdout or stderr. Logs go
//! to a daily file under `~/.attn/logs/`; if that directory is unusable the
//! process runs without a subscriber.

use fs_err as fs;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "attn-hook";
const LOG_FILE_SUFFIX: &str = "log";

/// Installs the file subscriber. Keep the guard alive until exit so buffered
/// lines are flushed.
pub fn init() -> Option<WorkerGuard> {
    let dir = attn_core::paths::log_dir().ok()?;
    fs::create_dir_all(&dir).ok()?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(&dir)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .ok()?;
    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("ATTN_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
