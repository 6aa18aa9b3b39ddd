//! Configuration loading and normalization
//!
//! Configuration is layered, lowest precedence first:
//! 1. built-in defaults
//! 2. the user configuration file (`~/.config/luapack/luapack.toml`)
//! 3. the project file passed with `--config` (`luapack.config.json` or `*.toml`)
//! 4. `LUAPACK_*` environment variables
//! 5. command line flags
//!
//! Every layer is read into a [`ConfigFile`] with its relative paths already
//! resolved against the layer's base directory, then merged. The merged
//! result is normalized into a [`Config`], which is what the core consumes.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{dirs, error::BundleError, util};

/// Default length of generated identifiers
pub const DEFAULT_RENAME_LENGTH: usize = 5;

/// Environment variable consulted for external search roots by default
pub const DEFAULT_ENV_VAR: &str = "LUA_PATH";

/// Raw configuration as written in a file (or assembled from one layer)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(rename = "$schema")]
    pub schema: Option<String>,
    pub entry: Option<PathBuf>,
    pub output: Option<PathBuf>,
    #[serde(alias = "source_root", alias = "sourceroot")]
    pub source_root: Option<PathBuf>,
    pub modules: Option<ModulesSection>,
    pub obfuscation: Option<ObfuscationSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModulesSection {
    pub ignore: Option<Vec<String>>,
    #[serde(alias = "ignore_missing")]
    pub ignore_missing: Option<bool>,
    pub overrides: Option<IndexMap<String, OverrideSection>>,
    pub external: Option<ExternalSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideSection {
    pub path: Option<PathBuf>,
    pub recursive: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalSection {
    pub enabled: Option<bool>,
    pub recursive: Option<bool>,
    pub paths: Option<Vec<PathBuf>>,
    pub env: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObfuscationSection {
    pub tool: Option<ObfuscationTool>,
    pub config: Option<ObfuscationOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObfuscationOptions {
    pub minify: Option<bool>,
    #[serde(alias = "rename_variables")]
    pub rename_variables: Option<RenameSetting>,
    pub ascii: Option<bool>,
}

/// `renameVariables` accepts either a plain toggle or a detailed table
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum RenameSetting {
    Toggle(bool),
    Detailed(RenameDetails),
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameDetails {
    pub enabled: Option<bool>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObfuscationTool {
    #[default]
    None,
    Internal,
}

impl FromStr for ObfuscationTool {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "internal" => Ok(Self::Internal),
            other => Err(format!(
                "unknown obfuscation tool '{other}' (expected 'internal' or 'none')"
            )),
        }
    }
}

impl ConfigFile {
    /// Read a JSON or TOML configuration file, chosen by extension
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Config file not found at {}", path.display()))?;
        let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str::<Self>(&raw).map_err(|err| BundleError::Config(err.to_string()))
        } else {
            serde_json::from_str::<Self>(&raw).map_err(|err| BundleError::Config(err.to_string()))
        };
        parsed.with_context(|| format!("Failed to read config file '{}'", path.display()))
    }

    /// Resolve every filesystem path of this layer against `base_dir`
    ///
    /// Override paths are left untouched: they are relative to the source root,
    /// which is only known after all layers are merged.
    pub fn resolve_paths(mut self, base_dir: &Path) -> Self {
        let resolve = |path: PathBuf| util::resolve_path(base_dir, &path);
        self.entry = self.entry.map(resolve);
        self.output = self.output.map(resolve);
        self.source_root = self.source_root.map(resolve);
        if let Some(paths) = self
            .modules
            .as_mut()
            .and_then(|modules| modules.external.as_mut())
            .and_then(|external| external.paths.as_mut())
        {
            for path in paths.iter_mut() {
                *path = util::resolve_path(base_dir, path);
            }
        }
        self
    }

    /// Overlay `other` on top of `self`; fields set in `other` win
    pub fn merge(self, other: Self) -> Self {
        Self {
            schema: other.schema.or(self.schema),
            entry: other.entry.or(self.entry),
            output: other.output.or(self.output),
            source_root: other.source_root.or(self.source_root),
            modules: merge_option(self.modules, other.modules, ModulesSection::merge),
            obfuscation: merge_option(
                self.obfuscation,
                other.obfuscation,
                ObfuscationSection::merge,
            ),
        }
    }
}

impl ModulesSection {
    fn merge(self, other: Self) -> Self {
        let overrides = match (self.overrides, other.overrides) {
            (Some(mut base), Some(top)) => {
                base.extend(top);
                Some(base)
            }
            (base, top) => top.or(base),
        };
        Self {
            ignore: other.ignore.or(self.ignore),
            ignore_missing: other.ignore_missing.or(self.ignore_missing),
            overrides,
            external: merge_option(self.external, other.external, |base, top| {
                ExternalSection {
                    enabled: top.enabled.or(base.enabled),
                    recursive: top.recursive.or(base.recursive),
                    paths: top.paths.or(base.paths),
                    env: top.env.or(base.env),
                }
            }),
        }
    }
}

impl ObfuscationSection {
    fn merge(self, other: Self) -> Self {
        Self {
            tool: other.tool.or(self.tool),
            config: merge_option(self.config, other.config, |base, top| ObfuscationOptions {
                minify: top.minify.or(base.minify),
                rename_variables: top.rename_variables.or(base.rename_variables),
                ascii: top.ascii.or(base.ascii),
            }),
        }
    }
}

fn merge_option<T>(base: Option<T>, top: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, top) {
        (Some(base), Some(top)) => Some(merge(base, top)),
        (base, top) => top.or(base),
    }
}

/// Normalized configuration consumed by the resolver, analyzer and bundler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub entry: PathBuf,
    pub output: PathBuf,
    pub source_root: PathBuf,
    pub modules: ModulesConfig,
    pub obfuscation: ObfuscationConfig,
    /// Set when the run only analyzes and never writes a bundle
    pub analyze_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesConfig {
    pub ignore: Vec<String>,
    pub ignore_missing: bool,
    pub overrides: IndexMap<String, OverrideConfig>,
    pub external: ExternalConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideConfig {
    /// Absolute, or relative to the source root
    pub path: Option<PathBuf>,
    /// Takes precedence over every other recursion policy for this module
    pub recursive: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalConfig {
    pub enabled: bool,
    /// Whether modules found outside the source root are analyzed
    pub recursive: bool,
    pub paths: Vec<PathBuf>,
    /// `None` means the default variable list; an empty list disables lookup
    pub env: Option<Vec<String>>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recursive: true,
            paths: Vec::new(),
            env: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObfuscationConfig {
    pub tool: ObfuscationTool,
    pub minify: bool,
    pub rename: RenameConfig,
    pub ascii: bool,
}

impl ObfuscationConfig {
    fn is_internal(&self) -> bool {
        self.tool == ObfuscationTool::Internal
    }

    pub fn minify_enabled(&self) -> bool {
        self.is_internal() && self.minify
    }

    pub fn rename_enabled(&self) -> bool {
        self.is_internal() && self.rename.enabled
    }

    pub fn ascii_enabled(&self) -> bool {
        self.is_internal() && self.ascii
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenameConfig {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min: DEFAULT_RENAME_LENGTH,
            max: DEFAULT_RENAME_LENGTH,
        }
    }
}

impl RenameConfig {
    /// Normalize a raw setting: `min >= 1`, `max >= min`
    pub fn from_setting(setting: Option<RenameSetting>) -> Self {
        let defaults = Self::default();
        match setting {
            None => defaults,
            Some(RenameSetting::Toggle(enabled)) => Self {
                enabled,
                ..defaults
            },
            Some(RenameSetting::Detailed(details)) => {
                let min = details
                    .min
                    .map_or(defaults.min, |min| clamp_length(min, 1));
                let max = details
                    .max
                    .map_or(min.max(defaults.max), |max| clamp_length(max, min));
                Self {
                    enabled: details.enabled.unwrap_or(defaults.enabled),
                    min,
                    max,
                }
            }
        }
    }
}

fn clamp_length(value: i64, floor: usize) -> usize {
    usize::try_from(value).map_or(floor, |value| value.max(floor))
}

impl Config {
    /// Build a configuration for `entry` with every option at its default
    pub fn for_entry(entry: impl AsRef<Path>) -> Self {
        let entry = util::absolutize(entry.as_ref());
        let source_root = entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            output: default_output_path(&entry),
            entry,
            source_root,
            modules: ModulesConfig::default(),
            obfuscation: ObfuscationConfig::default(),
            analyze_only: false,
        }
    }

    /// Normalize a fully merged configuration layer
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        let Some(entry) = file.entry else {
            bail!(BundleError::Config(
                "configuration must specify an entry file".to_owned()
            ));
        };
        let entry = util::absolutize(&entry);
        let output = file
            .output
            .map_or_else(|| default_output_path(&entry), |out| util::absolutize(&out));
        let source_root = file.source_root.map_or_else(
            || {
                entry
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
            },
            |root| util::absolutize(&root),
        );

        let modules = file.modules.unwrap_or_default();
        let external = modules.external.unwrap_or_default();
        let modules = ModulesConfig {
            ignore: modules.ignore.unwrap_or_default(),
            ignore_missing: modules.ignore_missing.unwrap_or(false),
            overrides: modules
                .overrides
                .unwrap_or_default()
                .into_iter()
                .map(|(id, section)| {
                    (
                        util::normalize_module_id(&id).into_owned(),
                        OverrideConfig {
                            path: section.path,
                            recursive: section.recursive,
                        },
                    )
                })
                .collect(),
            external: ExternalConfig {
                enabled: external.enabled.unwrap_or(false),
                recursive: external.recursive.unwrap_or(true),
                paths: external
                    .paths
                    .unwrap_or_default()
                    .iter()
                    .map(|path| util::resolve_path(&source_root, path))
                    .collect(),
                env: external.env.map(|names| normalize_env_names(&names)),
            },
        };

        let obfuscation = file.obfuscation.unwrap_or_default();
        let options = obfuscation.config.unwrap_or_default();
        let obfuscation = ObfuscationConfig {
            tool: obfuscation.tool.unwrap_or_default(),
            minify: options.minify.unwrap_or(false),
            rename: RenameConfig::from_setting(options.rename_variables),
            ascii: options.ascii.unwrap_or(false),
        };

        Ok(Self {
            entry,
            output,
            source_root,
            modules,
            obfuscation,
            analyze_only: false,
        })
    }
}

/// Trim variable names and drop empty ones
pub fn normalize_env_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `<entry dir>/<entry stem>_packed.lua`
pub fn default_output_path(entry: &Path) -> PathBuf {
    let stem = entry
        .file_stem()
        .map_or_else(|| "bundle".to_owned(), |stem| stem.to_string_lossy().into_owned());
    entry
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("{stem}_packed.lua"))
}

/// Parse a command line / environment toggle
pub fn parse_toggle(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("invalid toggle value '{other}'")),
    }
}

/// Values supplied on the command line; every field is optional
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub entry: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub source_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub minify: Option<bool>,
    pub rename_variables: Option<bool>,
    pub ascii: Option<bool>,
    pub obfuscation_tool: Option<ObfuscationTool>,
    pub ignore_missing: Option<bool>,
    pub env: Option<Vec<String>>,
}

impl ConfigOverrides {
    fn into_layer(self) -> ConfigFile {
        let has_toggle =
            self.minify.is_some() || self.rename_variables.is_some() || self.ascii.is_some();
        let tool = self
            .obfuscation_tool
            .or_else(|| has_toggle.then_some(ObfuscationTool::Internal));
        let obfuscation = (tool.is_some() || has_toggle).then(|| ObfuscationSection {
            tool,
            config: has_toggle.then(|| ObfuscationOptions {
                minify: self.minify,
                rename_variables: self.rename_variables.map(RenameSetting::Toggle),
                ascii: self.ascii,
            }),
        });
        let modules = (self.ignore_missing.is_some() || self.env.is_some()).then(|| {
            ModulesSection {
                ignore_missing: self.ignore_missing,
                external: self.env.map(|env| ExternalSection {
                    env: Some(env),
                    ..ExternalSection::default()
                }),
                ..ModulesSection::default()
            }
        });
        ConfigFile {
            entry: self.entry,
            output: self.output,
            source_root: self.source_root,
            modules,
            obfuscation,
            ..ConfigFile::default()
        }
    }
}

/// Loads and layers configuration sources
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config: Option<PathBuf>,
    read_env: bool,
    cwd: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader using the user configuration file and `LUAPACK_*` variables
    pub fn new() -> Self {
        Self {
            user_config: dirs::user_config_file(),
            read_env: true,
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Loader that only considers explicit files and overrides
    pub fn isolated() -> Self {
        Self {
            user_config: None,
            read_env: false,
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Resolve command line paths against `cwd` instead of the process directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    #[must_use]
    pub fn with_user_config(mut self, path: Option<PathBuf>) -> Self {
        self.user_config = path;
        self
    }

    pub fn load(&self, overrides: ConfigOverrides) -> Result<Config> {
        let mut merged = ConfigFile::default();

        if let Some(user_config) = &self.user_config {
            debug!("Loading user configuration from {}", user_config.display());
            let layer = ConfigFile::read(user_config)?;
            merged = merged.merge(layer.resolve_paths(parent_dir(user_config)));
        }

        if let Some(config_path) = &overrides.config {
            let config_path = util::resolve_path(&self.cwd, config_path);
            debug!("Loading configuration from {}", config_path.display());
            let layer = ConfigFile::read(&config_path)?;
            merged = merged.merge(layer.resolve_paths(parent_dir(&config_path)));
        }

        if self.read_env {
            merged = merged.merge(env_layer()?.resolve_paths(&self.cwd));
        }

        merged = merged.merge(overrides.into_layer().resolve_paths(&self.cwd));
        Config::from_file(merged)
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

/// Configuration layer from `LUAPACK_*` environment variables
fn env_layer() -> Result<ConfigFile> {
    let var = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|value| !value.trim().is_empty())
    };
    let ignore_missing = var("LUAPACK_IGNORE_MISSING")
        .map(|value| parse_toggle(&value).map_err(BundleError::Config))
        .transpose()
        .context("Invalid LUAPACK_IGNORE_MISSING")?;
    Ok(ConfigFile {
        entry: var("LUAPACK_ENTRY").map(PathBuf::from),
        output: var("LUAPACK_OUTPUT").map(PathBuf::from),
        source_root: var("LUAPACK_SOURCE_ROOT").map(PathBuf::from),
        modules: ignore_missing.map(|ignore_missing| ModulesSection {
            ignore_missing: Some(ignore_missing),
            ..ModulesSection::default()
        }),
        ..ConfigFile::default()
    })
}
