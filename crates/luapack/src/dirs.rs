//! Platform directories used by luapack

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

/// Name of the per-user configuration file
pub const USER_CONFIG_FILE: &str = "luapack.toml";

/// Platform configuration directory for luapack
///
/// `~/.config/luapack` on Linux and macOS (XDG layout), `%APPDATA%\luapack` on Windows.
pub fn config_dir() -> Option<PathBuf> {
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("luapack"))
}

/// The user configuration file, if one exists
pub fn user_config_file() -> Option<PathBuf> {
    let path = config_dir()?.join(USER_CONFIG_FILE);
    if path.is_file() {
        log::debug!("Found user configuration at {}", path.display());
        Some(path)
    } else {
        None
    }
}
