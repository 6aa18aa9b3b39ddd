use std::{
    borrow::Cow,
    path::{Component, Path, PathBuf},
};

use cow_utils::CowUtils;

/// File extension of Lua modules, without the dot
pub const LUA_EXTENSION: &str = "lua";

/// Name of the directory-default file, without extension
pub const INIT_STEM: &str = "init";

/// Normalize a require identifier to forward slashes
pub fn normalize_module_id(module_id: &str) -> Cow<'_, str> {
    module_id.cow_replace('\\', "/")
}

/// Lexically normalize a path, folding `.` and `..` components
///
/// This never touches the filesystem, so it works for paths that do not
/// exist yet (output files) and keeps symlinked roots stable.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Resolve a path against the current working directory
pub fn absolutize(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_default();
    resolve_path(&cwd, path)
}

/// Whether `path` lies inside `root` (or is `root` itself)
pub fn is_within(root: &Path, path: &Path) -> bool {
    normalize_path(path).starts_with(normalize_path(root))
}

/// Strip a trailing `.lua` extension from a textual path
pub fn strip_lua_extension(path: &str) -> &str {
    path.strip_suffix(".lua").unwrap_or(path)
}

/// Render a path with forward slashes regardless of platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_module_id() {
        assert_eq!(normalize_module_id("app\\util"), "app/util");
        assert!(matches!(normalize_module_id("app.util"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_normalize_path_folds_parent_components() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.lua")),
            PathBuf::from("/a/c/d.lua")
        );
    }

    #[test]
    fn test_is_within() {
        assert!(is_within(Path::new("/src"), Path::new("/src/app/x.lua")));
        assert!(!is_within(Path::new("/src"), Path::new("/srcx/app.lua")));
        assert!(!is_within(Path::new("/src"), Path::new("/src/../lib/a.lua")));
    }

    #[test]
    fn test_to_slash() {
        assert_eq!(to_slash(Path::new("pkg/sub/init.lua")), "pkg/sub/init.lua");
    }
}
