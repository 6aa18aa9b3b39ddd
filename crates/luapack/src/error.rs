//! Error taxonomy for a bundling run
//!
//! Resolution failures are recoverable (they degrade to missing-module records
//! under the ignore-missing policy), everything else aborts the run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    /// No candidate path satisfied the resolution rules
    #[error("Module not found: {module_id}")]
    ModuleNotFound { module_id: String },

    /// An explicit override points at a file that does not exist
    #[error("Override path for module '{module_id}' not found: {path}")]
    OverridePathNotFound { module_id: String, path: String },

    /// A structural cycle was found while ordering the graph
    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// The identifier generator could not find a free name
    #[error("Failed to generate a unique identifier after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    #[error("Failed to access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Formatter failed: {0}")]
    Format(String),
}

impl BundleError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the ignore-missing policy may downgrade this error
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. } | Self::OverridePathNotFound { .. }
        )
    }

    /// Stable machine-readable code used by the JSON report
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            Self::OverridePathNotFound { .. } => "OVERRIDE_PATH_NOT_FOUND",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::GenerationExhausted { .. } => "GENERATION_EXHAUSTED",
            Self::Io { .. } => "IO_ERROR",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Format(_) => "FORMAT_ERROR",
        }
    }
}

pub type BundleResult<T> = Result<T, BundleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_joins_path() {
        let err = BundleError::CircularDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert!(!err.is_resolution_failure());
    }

    #[test]
    fn test_resolution_failures_are_recoverable() {
        let not_found = BundleError::ModuleNotFound {
            module_id: "vendor.pkg".into(),
        };
        assert!(not_found.is_resolution_failure());
        assert_eq!(not_found.code(), "MODULE_NOT_FOUND");
    }
}
