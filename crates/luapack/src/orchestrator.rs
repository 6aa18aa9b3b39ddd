//! One bundling run from configuration to artifact
//!
//! Analysis always runs. Assembly, obfuscation and the artifact write only
//! happen when analysis reported no errors, so a failed run never leaves a
//! partial bundle behind.

use std::{fs, path::Path};

use indexmap::IndexMap;
use log::{debug, info};

use crate::{
    analysis::{AnalysisPipeline, AnalysisResult},
    code_generator::{BundleAssembler, RequireAliases},
    config::Config,
    error::{BundleError, BundleResult},
    obfuscation::ObfuscationPipeline,
};

#[derive(Debug)]
pub struct BundleOrchestrator {
    config: Config,
}

impl BundleOrchestrator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dependency analysis only
    pub fn analyze(&self) -> AnalysisResult {
        AnalysisPipeline::new(&self.config).run()
    }

    /// Analyze, then assemble and write the bundle unless analysis failed or
    /// the run is analyze-only
    ///
    /// Failures after analysis are appended to the result's errors.
    pub fn run(&self) -> AnalysisResult {
        let mut analysis = self.analyze();
        if !analysis.success {
            info!("Analysis reported errors; no bundle written");
            return analysis;
        }
        if self.config.analyze_only {
            return analysis;
        }

        match self.write_bundle(&analysis) {
            Ok(size) => {
                analysis.metrics.bundle_size_bytes = size;
                info!(
                    "Bundle written to {} ({size} bytes)",
                    self.config.output.display()
                );
            }
            Err(err) => {
                analysis.errors.push(err);
                analysis.success = false;
            }
        }
        analysis
    }

    /// Assemble the ordered modules and apply the obfuscation stages
    pub fn render_bundle(&self, analysis: &AnalysisResult) -> BundleResult<String> {
        let entry = analysis.entry_module.as_ref().ok_or_else(|| {
            BundleError::Config("analysis produced no entry module".to_owned())
        })?;

        let bundle = BundleAssembler::new()
            .with_aliases(require_aliases(analysis))
            .assemble(entry, &analysis.sorted_modules)?;
        debug!("Assembled {} bytes", bundle.len());

        let pipeline = ObfuscationPipeline::new(self.config.obfuscation);
        if !pipeline.is_active() {
            return Ok(bundle);
        }
        pipeline.run(bundle, &chunk_name(&self.config.output))
    }

    fn write_bundle(&self, analysis: &AnalysisResult) -> BundleResult<u64> {
        let bundle = self.render_bundle(analysis)?;
        let output = &self.config.output;
        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| BundleError::io(parent, err))?;
        }
        fs::write(output, &bundle).map_err(|err| BundleError::io(output, err))?;
        Ok(bundle.len() as u64)
    }
}

/// Require identifiers whose module is registered under a different name,
/// keyed by the module that issues the `require`
fn require_aliases(analysis: &AnalysisResult) -> RequireAliases {
    let mut aliases = RequireAliases::new();
    for (requester, edges) in &analysis.dependency_graph {
        let row: IndexMap<String, String> = edges
            .iter()
            .filter(|edge| !edge.is_missing && edge.id != edge.module_name)
            .map(|edge| (edge.id.clone(), edge.module_name.clone()))
            .collect();
        if !row.is_empty() {
            aliases.insert(requester.clone(), row);
        }
    }
    aliases
}

fn chunk_name(output: &Path) -> String {
    output
        .file_stem()
        .map_or_else(|| "bundle".to_owned(), |stem| stem.to_string_lossy().into_owned())
}
