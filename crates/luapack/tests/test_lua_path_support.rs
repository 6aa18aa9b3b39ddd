#![allow(clippy::disallowed_methods)]

use std::{fs, path::Path};

use luapack::{
    analysis::AnalysisPipeline,
    config::Config,
    lua_path::LuaPathGuard,
    resolver::ModuleResolver,
    types::ModuleRecord,
};
use serial_test::serial;
use tempfile::TempDir;

fn write_module(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
#[serial]
fn test_lua_path_module_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let src_dir = temp_dir.path().join("src");
    let vendor_dir = temp_dir.path().join("vendor");

    write_module(&src_dir.join("main.lua"), "return require('json')");
    write_module(&vendor_dir.join("json.lua"), "return {}");
    write_module(&vendor_dir.join("socket/init.lua"), "return {}");

    let lua_path = format!(
        "{dir}/?.lua;{dir}/?/init.lua;;",
        dir = vendor_dir.display()
    );
    let _guard = LuaPathGuard::new("LUA_PATH", &lua_path);

    let config = Config::for_entry(src_dir.join("main.lua"));
    let resolver = ModuleResolver::new(&config);

    assert_eq!(resolver.external_env().all_paths, vec![vendor_dir.clone()]);

    let json = resolver.resolve("json", &src_dir).unwrap();
    assert!(json.is_external(), "modules found through LUA_PATH are external");
    assert_eq!(json.module_name(), "json");

    let socket = resolver.resolve("socket", &src_dir).unwrap();
    assert_eq!(socket.file_path(), Some(vendor_dir.join("socket/init.lua").as_path()));
}

#[test]
#[serial]
fn test_custom_variable_names_replace_the_default() {
    let temp_dir = TempDir::new().unwrap();
    let src_dir = temp_dir.path().join("src");
    let default_dir = temp_dir.path().join("default");
    let custom_dir = temp_dir.path().join("custom");

    write_module(&src_dir.join("main.lua"), "return 1");
    write_module(&default_dir.join("only_default.lua"), "return 1");
    write_module(&custom_dir.join("only_custom.lua"), "return 1");

    let _default = LuaPathGuard::new("LUA_PATH", &format!("{}/?.lua", default_dir.display()));
    let _custom = LuaPathGuard::new(
        "LUAPACK_TEST_PATH",
        &format!("{}/?.lua", custom_dir.display()),
    );

    let mut config = Config::for_entry(src_dir.join("main.lua"));
    config.modules.external.env = Some(vec!["LUAPACK_TEST_PATH".to_owned()]);
    let resolver = ModuleResolver::new(&config);

    assert!(resolver.external_env().has_explicit_config);
    assert!(resolver.resolve("only_custom", &src_dir).is_ok());
    let err = resolver.resolve("only_default", &src_dir).unwrap_err();
    assert_eq!(err.code(), "MODULE_NOT_FOUND");
}

#[test]
#[serial]
fn test_empty_name_list_disables_environment_roots() {
    let temp_dir = TempDir::new().unwrap();
    let src_dir = temp_dir.path().join("src");
    let vendor_dir = temp_dir.path().join("vendor");

    write_module(&src_dir.join("main.lua"), "return require('dep')");
    write_module(&vendor_dir.join("dep.lua"), "return 1");

    let _guard = LuaPathGuard::new("LUA_PATH", &format!("{}/?.lua", vendor_dir.display()));

    let mut config = Config::for_entry(src_dir.join("main.lua"));
    config.modules.external.env = Some(Vec::new());
    config.modules.ignore_missing = true;
    let analysis = AnalysisPipeline::new(&config).run();

    assert!(analysis.context.externals.env.all_paths.is_empty());
    assert_eq!(analysis.missing.len(), 1);
    assert!(matches!(
        analysis.modules.as_slice(),
        [ModuleRecord::Resolved(entry)] if entry.module_name == "main"
    ));
}

#[test]
#[serial]
fn test_unset_variable_contributes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let src_dir = temp_dir.path().join("src");
    write_module(&src_dir.join("main.lua"), "return 1");

    let _guard = LuaPathGuard::unset("LUA_PATH");

    let config = Config::for_entry(src_dir.join("main.lua"));
    let resolver = ModuleResolver::new(&config);

    assert!(!resolver.external_env().has_explicit_config);
    assert_eq!(resolver.external_env().names, vec!["LUA_PATH"]);
    assert!(resolver.external_env().all_paths.is_empty());
}
