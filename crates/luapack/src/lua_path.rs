//! External search roots derived from environment variables
//!
//! Lua search paths (`LUA_PATH` and friends) are `;`-separated templates such
//! as `/usr/share/lua/5.4/?.lua;./?/init.lua`. Each template is reduced to
//! the directory before its first `?`, which becomes an external root.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde::Serialize;

use crate::{config::DEFAULT_ENV_VAR, util};

/// Separator between entries of a Lua search path
pub const LUA_PATH_DELIMITER: char = ';';

/// External roots discovered from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEnv {
    /// Whether the variable names came from configuration rather than the default
    pub has_explicit_config: bool,
    pub names: Vec<String>,
    pub paths_by_env: IndexMap<String, Vec<PathBuf>>,
    /// Union of all variables' roots, first-seen order, without duplicates
    pub all_paths: Vec<PathBuf>,
}

/// Read the configured variables from the process environment
pub fn resolve_external_env(env_names: Option<&[String]>, source_root: &Path) -> ExternalEnv {
    resolve_external_env_with(env_names, source_root, |name| std::env::var(name).ok())
}

/// Same as [`resolve_external_env`] with an explicit variable lookup
pub fn resolve_external_env_with(
    env_names: Option<&[String]>,
    source_root: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> ExternalEnv {
    let has_explicit_config = env_names.is_some();
    let names: Vec<String> = env_names.map_or_else(
        || vec![DEFAULT_ENV_VAR.to_owned()],
        crate::config::normalize_env_names,
    );

    let mut paths_by_env = IndexMap::new();
    let mut aggregated = IndexSet::new();

    for name in &names {
        let mut resolved = IndexSet::new();
        if let Some(value) = lookup(name).filter(|value| !value.is_empty()) {
            for entry in value.split(LUA_PATH_DELIMITER) {
                let Some(root) = normalize_env_entry(entry, source_root) else {
                    continue;
                };
                resolved.insert(root.clone());
                aggregated.insert(root);
            }
        }
        debug!("{name} contributed {} external root(s)", resolved.len());
        paths_by_env.insert(name.clone(), resolved.into_iter().collect());
    }

    ExternalEnv {
        has_explicit_config,
        names,
        paths_by_env,
        all_paths: aggregated.into_iter().collect(),
    }
}

/// Reduce one search path template to a root directory
fn normalize_env_entry(entry: &str, source_root: &Path) -> Option<PathBuf> {
    let trimmed = entry.trim();
    let without_pattern = match trimmed.find('?') {
        Some(index) => &trimmed[..index],
        None => trimmed,
    };
    let without_pattern = without_pattern.trim_end_matches(['/', '\\']);
    if without_pattern.is_empty() {
        return None;
    }
    Some(util::resolve_path(source_root, Path::new(without_pattern)))
}

/// A scoped guard for setting an environment variable during tests.
///
/// The previous value is restored when the guard is dropped, even if the
/// test panics.
///
/// # Example
///
/// ```rust
/// use luapack::lua_path::LuaPathGuard;
/// let _guard = LuaPathGuard::new("LUA_PATH", "/tmp/lua/?.lua");
/// // LUA_PATH is now set; it is restored when _guard goes out of scope
/// ```
#[must_use = "LuaPathGuard must be held in scope to ensure cleanup"]
#[derive(Debug)]
pub struct LuaPathGuard {
    name: String,
    original_value: Option<String>,
}

impl LuaPathGuard {
    pub fn new(name: &str, value: &str) -> Self {
        let original_value = std::env::var(name).ok();

        // SAFETY: guards are only used from tests that are serialized with
        // `serial_test`, so no other thread reads the environment concurrently.
        unsafe {
            std::env::set_var(name, value);
        }

        Self {
            name: name.to_owned(),
            original_value,
        }
    }

    /// Ensure the variable is unset for the guard's lifetime
    pub fn unset(name: &str) -> Self {
        let original_value = std::env::var(name).ok();

        // SAFETY: see `LuaPathGuard::new`
        unsafe {
            std::env::remove_var(name);
        }

        Self {
            name: name.to_owned(),
            original_value,
        }
    }
}

impl Drop for LuaPathGuard {
    fn drop(&mut self) {
        // catch_unwind keeps a failing restore from turning a panic into an abort
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // SAFETY: restores the state captured in the constructor
            unsafe {
                match self.original_value.take() {
                    Some(original) => std::env::set_var(&self.name, original),
                    None => std::env::remove_var(&self.name),
                }
            }
        }));
    }
}
