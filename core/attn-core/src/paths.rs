//! Filesystem locations under `~/.attn/`.
//!
//! The socket and config paths can be overridden through the environment so
//! tests and alternate installs can run side by side.

use std::path::PathBuf;

use crate::error::{AttnError, Result};

pub const SOCKET_PATH_ENV: &str = "ATTN_SOCKET_PATH";
pub const CONFIG_PATH_ENV: &str = "ATTN_CONFIG";

const ATTN_DIR: &str = ".attn";
const SOCKET_NAME: &str = "attn.sock";
const CONFIG_NAME: &str = "config.toml";
const LOG_DIR: &str = "logs";

pub fn attn_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(ATTN_DIR))
        .ok_or(AttnError::HomeDirNotFound)
}

pub fn socket_path() -> Result<PathBuf> {
    if let Some(path) = env_path(SOCKET_PATH_ENV) {
        return Ok(path);
    }
    Ok(attn_dir()?.join(SOCKET_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = env_path(CONFIG_PATH_ENV) {
        return Ok(path);
    }
    Ok(attn_dir()?.join(CONFIG_NAME))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(attn_dir()?.join(LOG_DIR))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
