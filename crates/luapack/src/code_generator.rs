//! Bundle assembly
//!
//! The generated chunk has three parts: a table of module loader functions
//! keyed by logical name, a small runtime that emulates `require` on top of
//! that table, and the call that runs the entry module.

use std::{fmt::Write as _, fs};

use indexmap::IndexMap;
use log::{debug, warn};

use crate::{
    error::{BundleError, BundleResult},
    types::ModuleRecord,
};

/// Runtime shared by every bundle
///
/// Each module body sees a `require` bound to its own logical name, so
/// `__lp_resolve` can consult the requester's row of `__lp_aliases` first.
/// Two modules may then use one identifier for different files. Without a
/// scoped alias the name is looked up directly, then `X` is tried as
/// `X.init` (and back). Anything else goes to the `require` that was in
/// scope when the bundle was loaded.
///
/// Results are cached per logical name, with `nil` stored as `true` like
/// `package.loaded`. The previous global `require` is restored before an
/// error from a module body is re-raised.
const RUNTIME: &str = r#"local __lp_cache = {}
local __lp_native_require = require

local function __lp_resolve(name, requester)
    local scoped = __lp_aliases[requester]
    if scoped ~= nil and scoped[name] ~= nil then
        return scoped[name]
    end
    if __lp_modules[name] ~= nil then
        return name
    end
    local alias
    if name:sub(-5) == ".init" then
        alias = name:sub(1, -6)
    else
        alias = name .. ".init"
    end
    if __lp_modules[alias] ~= nil then
        return alias
    end
    return nil
end

local __lp_require

local function __lp_call(name, ...)
    local previous = require
    require = function(id)
        return __lp_require(id, name)
    end
    local results = table.pack(pcall(__lp_modules[name], ...))
    require = previous
    if not results[1] then
        error(results[2], 0)
    end
    return table.unpack(results, 2, results.n)
end

__lp_require = function(name, requester)
    local key = __lp_resolve(name, requester)
    if key == nil then
        return __lp_native_require(name)
    end
    local cached = __lp_cache[key]
    if cached ~= nil then
        return cached
    end
    local result = __lp_call(key, key)
    if result == nil then
        result = true
    end
    __lp_cache[key] = result
    return result
end
"#;

/// Require identifiers that load a differently named module, grouped by the
/// logical name of the module issuing the `require`
pub type RequireAliases = IndexMap<String, IndexMap<String, String>>;

/// Produces bundle text from an ordered module list
#[derive(Debug, Default)]
pub struct BundleAssembler {
    aliases: RequireAliases,
}

impl BundleAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-requester identifiers that load a module registered under another
    /// logical name, e.g. `lib.a` requiring `util` and getting `lib/util.lua`
    #[must_use]
    pub fn with_aliases(mut self, aliases: RequireAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Read every module's source and assemble the bundle
    ///
    /// Records without a file (missing or ignored) are skipped; at runtime
    /// they resolve through the native `require`.
    pub fn assemble(&self, entry: &ModuleRecord, ordered: &[ModuleRecord]) -> BundleResult<String> {
        let mut sources = IndexMap::new();
        for module in ordered {
            let Some(file_path) = module.file_path() else {
                continue;
            };
            if sources.contains_key(module.module_name()) {
                warn!(
                    "Module name '{}' is provided by more than one file; keeping the first",
                    module.module_name()
                );
                continue;
            }
            let source =
                fs::read_to_string(file_path).map_err(|err| BundleError::io(file_path, err))?;
            sources.insert(module.module_name().to_owned(), source);
        }

        debug!(
            "Assembling bundle with {} module(s), entry '{}'",
            sources.len(),
            entry.module_name()
        );
        Ok(self.assemble_sources(entry.module_name(), &sources))
    }

    /// Assemble from already loaded sources, in the given order
    pub fn assemble_sources(&self, entry_name: &str, sources: &IndexMap<String, String>) -> String {
        let body_size: usize = sources.values().map(String::len).sum();
        let mut bundle = String::with_capacity(body_size + RUNTIME.len() + 256);

        bundle.push_str("local __lp_modules = {\n");
        for (name, source) in sources {
            let _ = writeln!(bundle, "[{}] = function(...)", lua_string(name));
            bundle.push_str(strip_shebang(source));
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
            bundle.push_str("end,\n");
        }
        bundle.push_str("}\n\n");

        bundle.push_str("local __lp_aliases = {\n");
        for (requester, targets) in &self.aliases {
            let mut row = targets
                .iter()
                .filter(|(id, name)| id != name && sources.contains_key(name.as_str()))
                .peekable();
            if row.peek().is_none() {
                continue;
            }
            let _ = writeln!(bundle, "[{}] = {{", lua_string(requester));
            for (id, name) in row {
                let _ = writeln!(bundle, "[{}] = {},", lua_string(id), lua_string(name));
            }
            bundle.push_str("},\n");
        }
        bundle.push_str("}\n\n");

        bundle.push_str(RUNTIME);

        let entry = lua_string(entry_name);
        let _ = write!(
            bundle,
            r#"
local function run_entry(...)
    local results = table.pack(__lp_call({entry}, ...))
    local first = results[1]
    if first == nil then
        first = true
    end
    if __lp_cache[{entry}] == nil then
        __lp_cache[{entry}] = first
    end
    return table.unpack(results, 1, results.n)
end

return run_entry(...)
"#
        );
        bundle
    }
}

/// A Lua lexer skips a leading `#` line; a function body would not
fn strip_shebang(source: &str) -> &str {
    if source.starts_with('#') {
        source.find('\n').map_or("", |index| &source[index..])
    } else {
        source
    }
}

/// Quote `value` as a Lua string literal
pub fn lua_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use insta::assert_snapshot;
    use tempfile::TempDir;

    use super::*;
    use crate::types::{MissingModule, ResolvedModule};

    fn module(name: &str, path: &Path) -> ModuleRecord {
        ModuleRecord::Resolved(ResolvedModule {
            id: name.to_owned(),
            module_name: name.to_owned(),
            file_path: path.to_path_buf(),
            is_external: false,
            override_applied: false,
            analyze_dependencies: true,
        })
    }

    fn sources(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(name, source)| ((*name).to_owned(), (*source).to_owned()))
            .collect()
    }

    #[test]
    fn test_module_table_entries_keep_order() {
        let bundle = BundleAssembler::new().assemble_sources(
            "main",
            &sources(&[("app.greeter", "return {}"), ("main", "print('hi')")]),
        );

        let greeter = bundle
            .find(r#"["app.greeter"] = function(...)"#)
            .expect("greeter loader should be present");
        let main = bundle
            .find(r#"["main"] = function(...)"#)
            .expect("main loader should be present");
        assert!(greeter < main);
        assert!(bundle.ends_with("return run_entry(...)\n"));
    }

    #[test]
    fn test_entry_invocation() {
        let bundle = BundleAssembler::new().assemble_sources("main", &sources(&[("main", "")]));
        let call = bundle
            .lines()
            .find(|line| line.contains("__lp_call(\"main\""))
            .expect("entry call should be emitted");
        assert_snapshot!(call.trim(), @r#"local results = table.pack(__lp_call("main", ...))"#);
    }

    #[test]
    fn test_trailing_comment_does_not_swallow_end() {
        let bundle = BundleAssembler::new()
            .assemble_sources("main", &sources(&[("main", "return 1 -- done")]));
        assert!(bundle.contains("return 1 -- done\nend,\n"));
    }

    #[test]
    fn test_aliases_are_scoped_to_requester() {
        let mut aliases = RequireAliases::new();
        aliases.insert(
            "lib.a".to_owned(),
            [("util", "lib.util"), ("same", "same"), ("gone", "not.bundled")]
                .into_iter()
                .map(|(id, name)| (id.to_owned(), name.to_owned()))
                .collect(),
        );
        aliases.insert(
            "main".to_owned(),
            [("gone", "not.bundled")]
                .into_iter()
                .map(|(id, name)| (id.to_owned(), name.to_owned()))
                .collect(),
        );
        let bundle = BundleAssembler::new().with_aliases(aliases).assemble_sources(
            "main",
            &sources(&[
                ("lib.util", "return {}"),
                ("util", "return {}"),
                ("same", ""),
                ("lib.a", ""),
                ("main", ""),
            ]),
        );

        let start = bundle.find("local __lp_aliases = {").expect("alias table");
        let table = &bundle[start..start + bundle[start..].find("}\n\n").expect("table end") + 1];
        assert_snapshot!(table, @r#"
        local __lp_aliases = {
        ["lib.a"] = {
        ["util"] = "lib.util",
        },
        }
        "#);
    }

    #[test]
    fn test_nested_modules_get_their_own_require() {
        let bundle = BundleAssembler::new().assemble_sources("main", &sources(&[("main", "")]));
        assert!(bundle.contains("return __lp_require(id, name)"));
        assert!(bundle.contains("local scoped = __lp_aliases[requester]"));
    }

    #[test]
    fn test_shebang_is_removed() {
        assert_eq!(strip_shebang("#!/usr/bin/lua\nprint(1)"), "\nprint(1)");
        assert_eq!(strip_shebang("print(1)"), "print(1)");
    }

    #[test]
    fn test_lua_string_escapes() {
        assert_snapshot!(lua_string(r#"a"b\c"#), @r#""a\"b\\c""#);
    }

    #[test]
    fn test_assemble_reads_files_and_skips_missing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let main_path = temp_dir.path().join("main.lua");
        fs::write(&main_path, "return require('vendor.pkg')")?;

        let entry = module("main", &main_path);
        let missing = ModuleRecord::Missing(MissingModule {
            id: "vendor.pkg".to_owned(),
            message: "Module not found: vendor.pkg".to_owned(),
            override_applied: false,
        });
        let bundle = BundleAssembler::new().assemble(&entry, &[missing, entry.clone()])?;

        assert!(bundle.contains("return require('vendor.pkg')"));
        assert!(!bundle.contains("[\"vendor.pkg\"]"));
        assert!(bundle.contains("return __lp_native_require(name)"));
        Ok(())
    }

    #[test]
    fn test_unreadable_module_is_io_error() {
        let entry = module("main", &PathBuf::from("/nonexistent/luapack/main.lua"));
        let err = BundleAssembler::new()
            .assemble(&entry, std::slice::from_ref(&entry))
            .expect_err("file does not exist");
        assert_eq!(err.code(), "IO_ERROR");
    }
}
