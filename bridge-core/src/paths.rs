// ABOUTME: Standard location of the bridge configuration file
// ABOUTME: Uses ~/.config/matrix-irc-bridge/config.toml when no other path is given

use directories::BaseDirs;
use std::path::PathBuf;

const APP_DIR: &str = "matrix-irc-bridge";

fn home_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// ~/.config/matrix-irc-bridge/
pub fn config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_DIR)
}

/// ~/.config/matrix-irc-bridge/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
