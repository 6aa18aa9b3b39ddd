//! Analysis pipeline: one structured result for a dependency walk
//!
//! The pipeline never fails as a whole. Every problem it runs into ends up in
//! [`AnalysisResult::errors`], and `success` is true iff that list is empty.

use std::{fs, path::PathBuf, time::Instant};

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use serde::{Serialize, Serializer, ser::SerializeSeq};

use crate::{
    config::{Config, ObfuscationConfig},
    error::BundleError,
    graph_builder::DependencyAnalyzer,
    lua_path::ExternalEnv,
    module_graph::DependencyGraph,
    types::{DependencyEdge, MissingRecord, ModuleRecord},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub entry_module: Option<ModuleRecord>,
    /// Unique modules reachable from the entry, missing ones excluded
    pub modules: Vec<ModuleRecord>,
    pub externals: Vec<ModuleRecord>,
    /// Outgoing edges keyed by the requiring module's logical name
    pub dependency_graph: IndexMap<String, Vec<DependencyEdge>>,
    /// Bundle order; empty when ordering failed
    pub sorted_modules: Vec<ModuleRecord>,
    pub topological_order: Vec<String>,
    /// Groups of mutually requiring modules, only filled when ordering failed
    pub cycles: Vec<Vec<String>>,
    pub missing: Vec<MissingRecord>,
    pub warnings: Vec<String>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<BundleError>,
    pub metrics: AnalysisMetrics,
    pub obfuscation: ObfuscationConfig,
    pub context: AnalysisContext,
    pub success: bool,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetrics {
    pub module_count: usize,
    pub external_count: usize,
    pub missing_count: usize,
    /// Sum of module file sizes in bytes
    pub module_size_sum: u64,
    pub estimated_bundle_size: u64,
    /// Size of the written artifact; zero until a bundle is produced
    pub bundle_size_bytes: u64,
}

/// Configuration snapshot the run was performed with
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    pub root_dir: PathBuf,
    pub entry_path: PathBuf,
    pub output_path: PathBuf,
    pub analyze_only: bool,
    pub ignored_patterns: Vec<String>,
    pub ignore_missing: bool,
    pub externals: ExternalContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalContext {
    pub enabled: bool,
    pub recursive: bool,
    pub paths: Vec<PathBuf>,
    pub env: ExternalEnv,
}

impl AnalysisContext {
    fn new(config: &Config, external_env: ExternalEnv) -> Self {
        let external = &config.modules.external;
        Self {
            root_dir: config.source_root.clone(),
            entry_path: config.entry.clone(),
            output_path: config.output.clone(),
            analyze_only: config.analyze_only,
            ignored_patterns: config.modules.ignore.clone(),
            ignore_missing: config.modules.ignore_missing,
            externals: ExternalContext {
                enabled: external.enabled,
                recursive: external.recursive,
                paths: external.paths.clone(),
                env: external_env,
            },
        }
    }
}

#[derive(Serialize)]
struct SerializedError<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a [String]>,
}

fn serialize_errors<S: Serializer>(
    errors: &[BundleError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(errors.len()))?;
    for error in errors {
        let path = match error {
            BundleError::CircularDependency { path } => Some(path.as_slice()),
            _ => None,
        };
        seq.serialize_element(&SerializedError {
            code: error.code(),
            message: error.to_string(),
            path,
        })?;
    }
    seq.end()
}

/// Runs the analyzer and packages its output
#[derive(Debug)]
pub struct AnalysisPipeline<'a> {
    config: &'a Config,
    analyzer: DependencyAnalyzer,
}

impl<'a> AnalysisPipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            analyzer: DependencyAnalyzer::new(config),
        }
    }

    pub fn with_analyzer(config: &'a Config, analyzer: DependencyAnalyzer) -> Self {
        Self { config, analyzer }
    }

    pub fn run(mut self) -> AnalysisResult {
        let start = Instant::now();
        let context = AnalysisContext::new(
            self.config,
            self.analyzer.resolver().external_env().clone(),
        );
        let mut analysis = AnalysisResult::empty(self.config.obfuscation, context);

        info!("Analyzing dependencies of {}", self.config.entry.display());
        let built = match self.analyzer.build_graph(&self.config.entry) {
            Ok(built) => built,
            Err(err) => {
                analysis.errors.push(err);
                analysis.success = false;
                analysis.duration_ms = elapsed_ms(start);
                return analysis;
            }
        };

        analysis.entry_module = Some(built.entry_module);
        analysis.metrics.missing_count = built.missing.len();
        analysis.missing = built.missing;
        analysis.errors.extend(built.errors);

        let graph = built.graph;
        if !graph.is_empty() {
            analysis.collect_modules(&graph);
            analysis.order_modules(&graph);

            analysis.metrics.module_count = analysis.modules.len();
            analysis.metrics.external_count = analysis.externals.len();
            analysis.metrics.module_size_sum = module_size_sum(&analysis.modules);
            analysis.metrics.estimated_bundle_size = analysis.metrics.module_size_sum;
            analysis.apply_missing_warnings();
        }

        analysis.duration_ms = elapsed_ms(start);
        analysis.success = analysis.errors.is_empty();
        debug!(
            "Analysis finished in {:.2}ms: {} module(s), {} error(s)",
            analysis.duration_ms,
            analysis.metrics.module_count,
            analysis.errors.len()
        );
        analysis
    }
}

impl AnalysisResult {
    fn empty(obfuscation: ObfuscationConfig, context: AnalysisContext) -> Self {
        Self {
            entry_module: None,
            modules: Vec::new(),
            externals: Vec::new(),
            dependency_graph: IndexMap::new(),
            sorted_modules: Vec::new(),
            topological_order: Vec::new(),
            cycles: Vec::new(),
            missing: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            metrics: AnalysisMetrics::default(),
            obfuscation,
            context,
            success: true,
            duration_ms: 0.0,
        }
    }

    /// One record per graph node; two files required under the same
    /// identifier from different directories are both kept
    fn collect_modules(&mut self, graph: &DependencyGraph) {
        for (_, node) in graph.iter() {
            self.dependency_graph
                .entry(node.module.module_name().to_owned())
                .or_insert_with(|| node.dependencies.clone());
            if !node.module.is_missing() {
                self.modules.push(node.module.clone());
            }
        }

        self.externals = self
            .modules
            .iter()
            .filter(|module| module.is_external())
            .cloned()
            .collect();
    }

    fn order_modules(&mut self, graph: &DependencyGraph) {
        match graph.topological_sort() {
            Ok(sorted) => {
                self.sorted_modules = sorted
                    .into_iter()
                    .filter(|module| !module.is_missing())
                    .cloned()
                    .collect();
                self.topological_order = self
                    .sorted_modules
                    .iter()
                    .map(|module| module.module_name().to_owned())
                    .collect();
            }
            Err(err) => {
                self.cycles = graph.cyclic_groups();
                warn!("{err}");
                self.errors.push(err);
                self.success = false;
            }
        }
    }

    /// Non-fatal override misses are surfaced as warnings, once per message
    fn apply_missing_warnings(&mut self) {
        let mut seen: IndexSet<String> = self.warnings.iter().cloned().collect();
        for missing in &self.missing {
            if missing.override_applied && !missing.fatal && seen.insert(missing.message.clone()) {
                self.warnings.push(missing.message.clone());
            }
        }
    }

    /// Non-fatal missing entries
    pub fn soft_missing(&self) -> impl Iterator<Item = &MissingRecord> {
        self.missing.iter().filter(|missing| !missing.fatal)
    }

    /// First error, for callers that need a single failure cause
    pub fn first_error(&self) -> Option<&BundleError> {
        self.errors.first()
    }
}

fn module_size_sum(modules: &[ModuleRecord]) -> u64 {
    modules
        .iter()
        .filter_map(|module| {
            let path = module.file_path()?;
            match fs::metadata(path) {
                Ok(metadata) => Some(metadata.len()),
                Err(err) => {
                    warn!(
                        "Failed to read size for module '{}': {err}",
                        module.module_name()
                    );
                    None
                }
            }
        })
        .sum()
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::{config::OverrideConfig, resolver::ModuleResolver};

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn run(config: &Config) -> AnalysisResult {
        let resolver = ModuleResolver::with_external_env(config, ExternalEnv::default());
        let analyzer = DependencyAnalyzer::with_resolver(resolver, config.modules.ignore_missing);
        AnalysisPipeline::with_analyzer(config, analyzer).run()
    }

    #[test]
    fn test_successful_analysis() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "local g = require('app.greeter')")?;
        create_test_file(&root.join("app/greeter.lua"), "return {}")?;

        let config = Config::for_entry(root.join("main.lua"));
        let analysis = run(&config);

        assert!(analysis.success);
        assert_eq!(analysis.topological_order, vec!["app.greeter", "main"]);
        assert_eq!(analysis.metrics.module_count, 2);
        assert_eq!(analysis.metrics.module_size_sum, 41);
        assert_eq!(analysis.dependency_graph["main"].len(), 1);
        Ok(())
    }

    #[test]
    fn test_same_identifier_from_two_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "require('lib.a')\nrequire('util')")?;
        create_test_file(&root.join("lib/a.lua"), "require('util')")?;
        create_test_file(&root.join("util.lua"), "return 1")?;
        create_test_file(&root.join("lib/util.lua"), "return 2")?;

        let config = Config::for_entry(root.join("main.lua"));
        let analysis = run(&config);

        assert!(analysis.success);
        assert_eq!(analysis.modules.len(), 4);
        assert_eq!(analysis.metrics.module_count, 4);
        assert_eq!(analysis.topological_order.len(), 4);
        assert!(analysis.topological_order.contains(&"lib.util".to_owned()));

        let lib_edges = &analysis.dependency_graph["lib.a"];
        assert_eq!(lib_edges[0].id, "util");
        assert_eq!(lib_edges[0].module_name, "lib.util");
        assert_eq!(analysis.dependency_graph["main"][1].module_name, "util");
        Ok(())
    }

    #[test]
    fn test_cycle_fails_with_groups() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "require('a')")?;
        create_test_file(&root.join("a.lua"), "require('b')")?;
        create_test_file(&root.join("b.lua"), "require('a')")?;

        let config = Config::for_entry(root.join("main.lua"));
        let analysis = run(&config);

        assert!(!analysis.success);
        assert!(analysis.sorted_modules.is_empty());
        assert_eq!(analysis.cycles, vec![vec!["a".to_owned(), "b".to_owned()]]);
        assert_eq!(
            analysis.first_error().map(BundleError::code),
            Some("CIRCULAR_DEPENDENCY")
        );
        Ok(())
    }

    #[test]
    fn test_override_miss_becomes_warning_when_ignored() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "require('gone')\nrequire('gone')")?;

        let mut config = Config::for_entry(root.join("main.lua"));
        config.modules.ignore_missing = true;
        config.modules.overrides.insert(
            "gone".to_owned(),
            OverrideConfig {
                path: Some("vendor/gone.lua".into()),
                recursive: None,
            },
        );
        let analysis = run(&config);

        assert!(analysis.success);
        assert_eq!(analysis.missing.len(), 2);
        assert_eq!(analysis.soft_missing().count(), 2);
        assert_eq!(analysis.warnings.len(), 1);
        assert!(analysis.warnings[0].starts_with("Override path for module 'gone'"));
        Ok(())
    }

    #[test]
    fn test_io_failure_is_reported_not_raised() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = Config::for_entry(temp_dir.path().join("missing.lua"));
        let analysis = run(&config);

        assert!(!analysis.success);
        assert!(analysis.entry_module.is_none());
        assert_eq!(analysis.errors.len(), 1);
        Ok(())
    }

    #[test]
    fn test_serializes_errors_with_codes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.lua"), "require('vendor.pkg')")?;

        let config = Config::for_entry(root.join("main.lua"));
        let analysis = run(&config);
        let json = serde_json::to_value(&analysis)?;

        assert_eq!(json["errors"][0]["code"], "MODULE_NOT_FOUND");
        assert_eq!(json["missing"][0]["requireId"], "vendor.pkg");
        assert_eq!(json["metrics"]["missingCount"], 1);
        Ok(())
    }
}
