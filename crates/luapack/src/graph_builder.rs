//! Builds the dependency graph by walking requires from the entry file

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, trace, warn};
use rustc_hash::FxHashSet;

use crate::{
    config::Config,
    error::{BundleError, BundleResult},
    module_graph::{DependencyGraph, GraphNode},
    require_scanner,
    resolver::ModuleResolver,
    types::{MissingRecord, ModuleRecord},
};

/// Output of one graph walk
#[derive(Debug)]
pub struct GraphBuildResult {
    pub graph: DependencyGraph,
    pub entry_module: ModuleRecord,
    /// Every unresolved require occurrence, fatal or not
    pub missing: Vec<MissingRecord>,
    /// Fatal resolution failures; the run fails if this is non-empty
    pub errors: Vec<BundleError>,
}

/// Depth-first walker over `require` calls
#[derive(Debug)]
pub struct DependencyAnalyzer {
    resolver: ModuleResolver,
    ignore_missing: bool,
    visited: FxHashSet<PathBuf>,
    missing: Vec<MissingRecord>,
    errors: Vec<BundleError>,
}

impl DependencyAnalyzer {
    pub fn new(config: &Config) -> Self {
        Self::with_resolver(ModuleResolver::new(config), config.modules.ignore_missing)
    }

    pub fn with_resolver(resolver: ModuleResolver, ignore_missing: bool) -> Self {
        Self {
            resolver,
            ignore_missing,
            visited: FxHashSet::default(),
            missing: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Walk the graph reachable from `entry_file`
    ///
    /// Resolution failures are collected rather than returned; only I/O
    /// errors abort the walk.
    pub fn build_graph(&mut self, entry_file: &Path) -> BundleResult<GraphBuildResult> {
        self.visited.clear();
        self.missing.clear();
        self.errors.clear();

        let mut graph = DependencyGraph::new();
        let entry_module = self.resolver.create_entry_record(entry_file);
        debug!(
            "Building dependency graph from entry '{}'",
            entry_module.module_name()
        );
        self.visit(&entry_module, &mut graph)?;

        debug!(
            "Dependency graph has {} node(s), {} missing require(s)",
            graph.len(),
            self.missing.len()
        );

        Ok(GraphBuildResult {
            graph,
            entry_module,
            missing: std::mem::take(&mut self.missing),
            errors: std::mem::take(&mut self.errors),
        })
    }

    fn visit(&mut self, module: &ModuleRecord, graph: &mut DependencyGraph) -> BundleResult<()> {
        let Some(resolved) = module.as_resolved() else {
            return Ok(());
        };
        if !self.visited.insert(resolved.file_path.clone()) {
            return Ok(());
        }

        if !resolved.analyze_dependencies {
            debug!(
                "Not analyzing dependencies of '{}' (non-recursive)",
                resolved.module_name
            );
            graph.insert(
                resolved.file_path.clone(),
                GraphNode {
                    module: module.clone(),
                    dependencies: Vec::new(),
                },
            );
            return Ok(());
        }

        let source = fs::read_to_string(&resolved.file_path)
            .map_err(|err| BundleError::io(&resolved.file_path, err))?;
        let requesting_dir = resolved
            .file_path
            .parent()
            .unwrap_or_else(|| Path::new(""));

        let mut dependencies = Vec::new();
        for require_id in require_scanner::find_requires(&source) {
            trace!("'{}' requires '{require_id}'", resolved.module_name);
            match self.resolver.resolve(require_id, requesting_dir) {
                Ok(record) if record.is_ignored() => {}
                Ok(record) => dependencies.push(record),
                Err(err) if err.is_resolution_failure() => {
                    let record = self.resolver.create_missing_record(require_id, &err);
                    self.record_missing(&resolved.module_name, require_id, &record, err);
                    dependencies.push(record);
                }
                Err(err) => return Err(err),
            }
        }

        graph.insert(
            resolved.file_path.clone(),
            GraphNode {
                module: module.clone(),
                dependencies: dependencies.iter().map(ModuleRecord::to_edge).collect(),
            },
        );

        for dependency in &dependencies {
            self.visit(dependency, graph)?;
        }
        Ok(())
    }

    fn record_missing(
        &mut self,
        required_by: &str,
        require_id: &str,
        record: &ModuleRecord,
        error: BundleError,
    ) {
        let fatal = !self.ignore_missing;
        if fatal {
            debug!("Unresolved require '{require_id}' in '{required_by}': {error}");
        } else {
            warn!("Module '{require_id}' required by '{required_by}' was not found; falling back to native require");
        }

        self.missing.push(MissingRecord {
            required_by: required_by.to_owned(),
            require_id: require_id.to_owned(),
            module_name: record.module_name().to_owned(),
            override_applied: record.override_applied(),
            fatal,
            message: error.to_string(),
            code: error.code(),
        });
        if fatal {
            self.errors.push(error);
        }
    }
}
