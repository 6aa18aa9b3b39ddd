//! Shared type definitions for the luapack crate
//!
//! These records are created once during an analysis pass and are read-only
//! afterwards. Resolution never mutates a record it already handed out.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Identity of one resolved unit
///
/// The three states carry only the fields valid for them, so a record can
/// never be both ignored and missing, and only resolved records have a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModuleRecord {
    Resolved(ResolvedModule),
    Ignored(IgnoredModule),
    Missing(MissingModule),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModule {
    /// Raw or normalized require identifier used to request the module
    pub id: String,
    /// Dotted name used as the key of the generated module table
    pub module_name: String,
    /// Absolute path on disk
    pub file_path: PathBuf,
    /// Resolved outside of the configured source root
    pub is_external: bool,
    /// Resolution used an explicit override instead of path search
    pub override_applied: bool,
    /// Whether the analyzer should descend into this module's own requires
    pub analyze_dependencies: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredModule {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingModule {
    pub id: String,
    /// Human readable reason reported by the resolver
    pub message: String,
    pub override_applied: bool,
}

impl ModuleRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::Resolved(module) => &module.id,
            Self::Ignored(module) => &module.id,
            Self::Missing(module) => &module.id,
        }
    }

    /// Logical name; unresolved records are addressed by their identifier
    pub fn module_name(&self) -> &str {
        match self {
            Self::Resolved(module) => &module.module_name,
            Self::Ignored(module) => &module.id,
            Self::Missing(module) => &module.id,
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::Resolved(module) => Some(&module.file_path),
            Self::Ignored(_) | Self::Missing(_) => None,
        }
    }

    pub fn as_resolved(&self) -> Option<&ResolvedModule> {
        match self {
            Self::Resolved(module) => Some(module),
            _ => None,
        }
    }

    pub fn is_external(&self) -> bool {
        self.as_resolved().is_some_and(|module| module.is_external)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }

    pub fn override_applied(&self) -> bool {
        match self {
            Self::Resolved(module) => module.override_applied,
            Self::Missing(module) => module.override_applied,
            Self::Ignored(_) => false,
        }
    }

    /// Ignored and missing modules are terminal and never analyzed
    pub fn analyze_dependencies(&self) -> bool {
        self.as_resolved()
            .is_some_and(|module| module.analyze_dependencies)
    }

    /// Snapshot this record as the target of a dependency edge
    pub fn to_edge(&self) -> DependencyEdge {
        DependencyEdge {
            id: self.id().to_owned(),
            module_name: self.module_name().to_owned(),
            file_path: self.file_path().map(Path::to_path_buf),
            is_external: self.is_external(),
            is_missing: self.is_missing(),
            override_applied: self.override_applied(),
        }
    }
}

/// A directed edge from a requesting module to a required module
///
/// The fields are copied out of the target record so later re-resolution does
/// not change what an edge reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub id: String,
    pub module_name: String,
    pub file_path: Option<PathBuf>,
    pub is_external: bool,
    pub is_missing: bool,
    pub override_applied: bool,
}

/// One occurrence of a require that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingRecord {
    /// Logical name of the module containing the require
    pub required_by: String,
    pub require_id: String,
    /// Placeholder name the generated loader will look up at runtime
    pub module_name: String,
    pub override_applied: bool,
    /// False when the ignore-missing policy let the run continue
    pub fatal: bool,
    pub message: String,
    pub code: &'static str,
}
