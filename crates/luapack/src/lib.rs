//! luapack: bundle a Lua entry file and everything it `require`s into one
//! self-contained chunk.

pub mod analysis;
pub mod code_generator;
pub mod config;
pub mod dirs;
pub mod error;
pub mod graph_builder;
pub mod lua_format;
pub mod lua_path;
pub mod module_graph;
pub mod obfuscation;
pub mod orchestrator;
pub mod reporter;
pub mod require_scanner;
pub mod resolver;
pub mod types;
pub mod util;
