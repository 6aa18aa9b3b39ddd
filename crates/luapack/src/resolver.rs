use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::{
    config::{Config, ExternalConfig, OverrideConfig},
    error::{BundleError, BundleResult},
    lua_path::{self, ExternalEnv},
    types::{IgnoredModule, MissingModule, ModuleRecord, ResolvedModule},
    util::{self, INIT_STEM, LUA_EXTENSION},
};

/// Resolves require identifiers to files on disk
///
/// The resolver holds no per-run state besides the configuration it was built
/// from, so resolving the same identifier twice yields equal records.
#[derive(Debug)]
pub struct ModuleResolver {
    source_root: PathBuf,
    ignore: FxHashSet<String>,
    overrides: IndexMap<String, OverrideConfig>,
    external: ExternalConfig,
    external_env: ExternalEnv,
}

impl ModuleResolver {
    pub fn new(config: &Config) -> Self {
        let external_env = lua_path::resolve_external_env(
            config.modules.external.env.as_deref(),
            &config.source_root,
        );
        Self::with_external_env(config, external_env)
    }

    /// Build a resolver with pre-computed environment roots
    pub fn with_external_env(config: &Config, external_env: ExternalEnv) -> Self {
        let ignore = config
            .modules
            .ignore
            .iter()
            .map(|id| util::normalize_module_id(id).into_owned())
            .collect();

        debug!(
            "Resolver initialized: source root {}, {} external root(s), {} env root(s)",
            config.source_root.display(),
            config.modules.external.paths.len(),
            external_env.all_paths.len()
        );

        Self {
            source_root: config.source_root.clone(),
            ignore,
            overrides: config.modules.overrides.clone(),
            external: config.modules.external.clone(),
            external_env,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn external_env(&self) -> &ExternalEnv {
        &self.external_env
    }

    /// Resolve `require_id` as seen from a module living in `requesting_dir`
    pub fn resolve(&self, require_id: &str, requesting_dir: &Path) -> BundleResult<ModuleRecord> {
        let module_id = util::normalize_module_id(require_id).into_owned();

        if self.ignore.contains(&module_id) {
            debug!("Module '{module_id}' is ignored");
            return Ok(ModuleRecord::Ignored(IgnoredModule { id: module_id }));
        }

        let override_config = self.overrides.get(&module_id);
        if let Some(override_path) = override_config.and_then(|config| config.path.as_deref()) {
            let candidate = self.resolve_override_path(override_path);
            let Some(file_path) = try_path(&candidate) else {
                return Err(BundleError::OverridePathNotFound {
                    module_id,
                    path: override_path.display().to_string(),
                });
            };
            debug!(
                "Module '{module_id}' resolved through override to {}",
                file_path.display()
            );
            return Ok(self.create_record(&module_id, file_path, true, override_config));
        }

        let relative = module_id.replace('.', "/");
        for root in self.search_roots(requesting_dir) {
            let candidate = util::resolve_path(&root, Path::new(&relative));
            trace!("Probing {} for '{module_id}'", candidate.display());
            if let Some(file_path) = try_path(&candidate) {
                debug!("Module '{module_id}' resolved to {}", file_path.display());
                return Ok(self.create_record(&module_id, file_path, false, override_config));
            }
        }

        Err(BundleError::ModuleNotFound { module_id })
    }

    /// Directories probed for a plain require, in priority order
    pub fn search_roots(&self, requesting_dir: &Path) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(
            2 + self.external.paths.len() + self.external_env.all_paths.len(),
        );
        roots.push(requesting_dir.to_path_buf());
        roots.push(self.source_root.clone());
        roots.extend(
            self.external
                .paths
                .iter()
                .map(|path| util::resolve_path(&self.source_root, path)),
        );
        roots.extend(self.external_env.all_paths.iter().cloned());
        roots
    }

    /// Record for the entry file, named after its location
    pub fn create_entry_record(&self, file_path: &Path) -> ModuleRecord {
        let file_path = util::absolutize(file_path);
        let module_name = self.derive_module_name(&file_path, None);
        self.create_record(&module_name, file_path, false, None)
    }

    /// Placeholder record for a require that could not be resolved
    pub fn create_missing_record(&self, require_id: &str, error: &BundleError) -> ModuleRecord {
        let module_id = util::normalize_module_id(require_id).into_owned();
        let override_applied = matches!(error, BundleError::OverridePathNotFound { .. });
        ModuleRecord::Missing(MissingModule {
            id: module_id,
            message: error.to_string(),
            override_applied,
        })
    }

    fn resolve_override_path(&self, override_path: &Path) -> PathBuf {
        let raw = override_path.to_string_lossy();
        let candidate = Path::new(util::strip_lua_extension(&raw));
        util::resolve_path(&self.source_root, candidate)
    }

    fn create_record(
        &self,
        module_id: &str,
        file_path: PathBuf,
        override_applied: bool,
        override_config: Option<&OverrideConfig>,
    ) -> ModuleRecord {
        let module_name = self.derive_module_name(&file_path, Some(module_id));
        let is_external = !util::is_within(&self.source_root, &file_path);
        let analyze_dependencies = match override_config.and_then(|config| config.recursive) {
            Some(recursive) => recursive,
            None if is_external => self.external.recursive,
            None => true,
        };

        let id = if module_id.is_empty() {
            module_name.clone()
        } else {
            module_id.to_owned()
        };

        ModuleRecord::Resolved(ResolvedModule {
            id,
            module_name,
            file_path,
            is_external,
            override_applied,
            analyze_dependencies,
        })
    }

    /// Dotted logical name of a file
    ///
    /// Files inside the source root are named by their relative path with a
    /// trailing `init` folded onto the parent directory; the root `init.lua`
    /// is always `init`. Files outside it use the identifier they were
    /// required by.
    pub fn derive_module_name(&self, file_path: &Path, fallback_id: Option<&str>) -> String {
        let fallback = fallback_id.filter(|id| !id.is_empty());

        let normalized = util::normalize_path(file_path);
        if let Ok(relative) = normalized.strip_prefix(util::normalize_path(&self.source_root)) {
            let relative = util::to_slash(relative);
            let without_extension = util::strip_lua_extension(&relative);
            if without_extension == INIT_STEM {
                return INIT_STEM.to_owned();
            }
            let without_init = without_extension
                .strip_suffix(INIT_STEM)
                .and_then(|parent| parent.strip_suffix('/'))
                .unwrap_or(without_extension);
            return without_init.replace('/', ".");
        }

        if let Some(fallback) = fallback {
            return fallback.to_owned();
        }

        let rendered = util::to_slash(file_path);
        util::strip_lua_extension(&rendered).replace('/', ".")
    }
}

/// Probe `base.lua`, then `base/init.lua`
fn try_path(base: &Path) -> Option<PathBuf> {
    let mut with_extension = OsString::from(base.as_os_str());
    with_extension.push(".");
    with_extension.push(LUA_EXTENSION);
    let file = PathBuf::from(with_extension);
    if file.is_file() {
        return Some(file);
    }

    let init = base.join(format!("{INIT_STEM}.{LUA_EXTENSION}"));
    if init.is_file() {
        return Some(init);
    }

    None
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn resolver_for(root: &Path, configure: impl FnOnce(&mut Config)) -> ModuleResolver {
        let mut config = Config::for_entry(root.join("main.lua"));
        configure(&mut config);
        ModuleResolver::with_external_env(&config, ExternalEnv::default())
    }

    fn resolved(record: &ModuleRecord) -> &ResolvedModule {
        record
            .as_resolved()
            .expect("expected a resolved module record")
    }

    #[test]
    fn test_resolves_dotted_identifier_under_source_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("app/greeter.lua"), "return {}")?;

        let resolver = resolver_for(root, |_| {});
        let record = resolver.resolve("app.greeter", root)?;
        let module = resolved(&record);

        assert_eq!(module.module_name, "app.greeter");
        assert_eq!(module.file_path, root.join("app/greeter.lua"));
        assert!(!module.is_external);
        assert!(module.analyze_dependencies);
        Ok(())
    }

    #[test]
    fn test_directory_default_collapses_init() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("pkg/sub/init.lua"), "return {}")?;

        let resolver = resolver_for(root, |_| {});
        let record = resolver.resolve("pkg.sub", root)?;

        assert_eq!(record.module_name(), "pkg.sub");
        assert_eq!(record.file_path(), Some(root.join("pkg/sub/init.lua").as_path()));
        Ok(())
    }

    #[test]
    fn test_file_takes_priority_over_directory_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("pkg.lua"), "return 1")?;
        create_test_file(&root.join("pkg/init.lua"), "return 2")?;

        let resolver = resolver_for(root, |_| {});
        let record = resolver.resolve("pkg", root)?;
        assert_eq!(record.file_path(), Some(root.join("pkg.lua").as_path()));
        Ok(())
    }

    #[test]
    fn test_requesting_directory_wins_over_source_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("util.lua"), "return 'root'")?;
        create_test_file(&root.join("lib/util.lua"), "return 'lib'")?;

        let resolver = resolver_for(root, |_| {});
        let record = resolver.resolve("util", &root.join("lib"))?;

        assert_eq!(record.file_path(), Some(root.join("lib/util.lua").as_path()));
        assert_eq!(record.module_name(), "lib.util");
        Ok(())
    }

    #[test]
    fn test_ignored_identifier_short_circuits() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("ffi.lua"), "return {}")?;

        let resolver = resolver_for(root, |config| {
            config.modules.ignore = vec!["ffi".to_owned()];
        });
        let record = resolver.resolve("ffi", root)?;

        assert!(record.is_ignored());
        assert!(!record.analyze_dependencies());
        Ok(())
    }

    #[test]
    fn test_missing_module_is_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let resolver = resolver_for(temp_dir.path(), |_| {});

        let err = resolver
            .resolve("vendor.pkg", temp_dir.path())
            .expect_err("nothing should resolve");
        assert_eq!(err.to_string(), "Module not found: vendor.pkg");
        Ok(())
    }

    #[test]
    fn test_override_path_strips_extension_and_sets_recursion() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("vendor/my/module.lua"), "return {}")?;

        let resolver = resolver_for(root, |config| {
            config.modules.overrides.insert(
                "my.module".to_owned(),
                OverrideConfig {
                    path: Some(PathBuf::from("./vendor/my/module.lua")),
                    recursive: Some(false),
                },
            );
        });
        let record = resolver.resolve("my.module", root)?;
        let module = resolved(&record);

        assert!(module.override_applied);
        assert!(!module.analyze_dependencies);
        assert_eq!(module.module_name, "vendor.my.module");
        Ok(())
    }

    #[test]
    fn test_override_with_missing_target_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let resolver = resolver_for(root, |config| {
            config.modules.overrides.insert(
                "gone".to_owned(),
                OverrideConfig {
                    path: Some(PathBuf::from("vendor/gone.lua")),
                    recursive: None,
                },
            );
        });
        let err = resolver
            .resolve("gone", root)
            .expect_err("override target does not exist");

        assert!(matches!(err, BundleError::OverridePathNotFound { .. }));
        let missing = resolver.create_missing_record("gone", &err);
        assert!(missing.override_applied());
        assert!(missing.is_missing());
        Ok(())
    }

    #[test]
    fn test_overrides_to_same_file_share_logical_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("shared/impl.lua"), "return {}")?;

        let resolver = resolver_for(root, |config| {
            for alias in ["alias.one", "alias.two"] {
                config.modules.overrides.insert(
                    alias.to_owned(),
                    OverrideConfig {
                        path: Some(PathBuf::from("shared/impl")),
                        recursive: None,
                    },
                );
            }
        });
        let first = resolver.resolve("alias.one", root)?;
        let second = resolver.resolve("alias.two", root)?;

        assert_eq!(first.module_name(), second.module_name());
        assert_eq!(first.file_path(), second.file_path());
        Ok(())
    }

    #[test]
    fn test_overrides_to_root_init_share_logical_name() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("init.lua"), "return {}")?;

        let resolver = resolver_for(root, |config| {
            for alias in ["alias.one", "alias.two"] {
                config.modules.overrides.insert(
                    alias.to_owned(),
                    OverrideConfig {
                        path: Some(PathBuf::from("init.lua")),
                        recursive: None,
                    },
                );
            }
        });
        let first = resolver.resolve("alias.one", root)?;
        let second = resolver.resolve("alias.two", root)?;

        assert_eq!(first.module_name(), "init");
        assert_eq!(second.module_name(), "init");
        assert_eq!(first.id(), "alias.one");
        Ok(())
    }

    #[test]
    fn test_override_without_path_only_sets_recursion() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("leaf.lua"), "return {}")?;

        let resolver = resolver_for(root, |config| {
            config.modules.overrides.insert(
                "leaf".to_owned(),
                OverrideConfig {
                    path: None,
                    recursive: Some(false),
                },
            );
        });
        let record = resolver.resolve("leaf", root)?;

        assert!(!record.override_applied());
        assert!(!record.analyze_dependencies());
        Ok(())
    }

    #[test]
    fn test_external_roots_and_recursion_policy() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("src");
        let vendor = temp_dir.path().join("vendor");
        create_test_file(&vendor.join("json.lua"), "return {}")?;
        fs::create_dir_all(&root)?;

        let resolver = resolver_for(&root, |config| {
            config.modules.external.paths = vec![vendor.clone()];
            config.modules.external.recursive = false;
        });
        let record = resolver.resolve("json", &root)?;
        let module = resolved(&record);

        assert!(module.is_external);
        assert!(!module.analyze_dependencies);
        assert_eq!(module.module_name, "json");
        Ok(())
    }

    #[test]
    fn test_env_roots_come_after_configured_roots() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("src");
        let configured = temp_dir.path().join("configured");
        let from_env = temp_dir.path().join("env");
        create_test_file(&configured.join("dep.lua"), "return 'configured'")?;
        create_test_file(&from_env.join("dep.lua"), "return 'env'")?;
        create_test_file(&from_env.join("only_env.lua"), "return 'env'")?;
        fs::create_dir_all(&root)?;

        let mut config = Config::for_entry(root.join("main.lua"));
        config.modules.external.paths = vec![configured.clone()];
        let env = ExternalEnv {
            all_paths: vec![from_env.clone()],
            ..ExternalEnv::default()
        };
        let resolver = ModuleResolver::with_external_env(&config, env);

        assert_eq!(
            resolver.resolve("dep", &root)?.file_path(),
            Some(configured.join("dep.lua").as_path())
        );
        assert_eq!(
            resolver.resolve("only_env", &root)?.file_path(),
            Some(from_env.join("only_env.lua").as_path())
        );
        assert_eq!(resolver.search_roots(&root).len(), 4);
        Ok(())
    }

    #[test]
    fn test_entry_record_naming() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "")?;
        create_test_file(&root.join("init.lua"), "")?;

        let resolver = resolver_for(root, |_| {});
        let entry = resolver.create_entry_record(&root.join("main.lua"));
        assert_eq!(entry.module_name(), "main");
        assert_eq!(entry.id(), "main");

        let init_entry = resolver.create_entry_record(&root.join("init.lua"));
        assert_eq!(init_entry.module_name(), "init");
        Ok(())
    }
}
