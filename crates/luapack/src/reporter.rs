//! Human and machine readable reports of an [`AnalysisResult`]
//!
//! Reports are display only; nothing here feeds back into a run.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;

use crate::{analysis::AnalysisResult, error::BundleError};

/// Plain text report for a terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn write_report<W: Write>(&self, analysis: &AnalysisResult, out: &mut W) -> io::Result<()> {
        write_summary(analysis, out)?;
        write_missing(analysis, out)?;
        write_list(out, "Warnings", &analysis.warnings)?;
        write_errors(&analysis.errors, out)?;
        write_cycles(&analysis.cycles, out)?;
        if self.verbose {
            write_tree(analysis, out)?;
            write_list(out, "Topological order", &analysis.topological_order)?;
        }
        Ok(())
    }
}

fn write_summary<W: Write>(analysis: &AnalysisResult, out: &mut W) -> io::Result<()> {
    let metrics = &analysis.metrics;
    let entry = analysis
        .entry_module
        .as_ref()
        .map_or("<none>", |entry| entry.module_name());

    writeln!(out, "Summary")?;
    writeln!(out, "  Entry:          {entry}")?;
    writeln!(out, "  Modules:        {}", metrics.module_count)?;
    writeln!(out, "  Externals:      {}", metrics.external_count)?;
    writeln!(out, "  Missing:        {}", metrics.missing_count)?;
    writeln!(
        out,
        "  Estimated size: {}",
        format_bytes(metrics.estimated_bundle_size)
    )?;
    if metrics.bundle_size_bytes > 0 {
        writeln!(
            out,
            "  Bundle size:    {}",
            format_bytes(metrics.bundle_size_bytes)
        )?;
    }
    writeln!(out, "  Duration:       {:.2}ms", analysis.duration_ms)?;
    writeln!(
        out,
        "  Status:         {}",
        if analysis.success { "ok" } else { "failed" }
    )
}

fn write_missing<W: Write>(analysis: &AnalysisResult, out: &mut W) -> io::Result<()> {
    if analysis.missing.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nMissing modules")?;
    for missing in &analysis.missing {
        let severity = if missing.fatal { "fatal" } else { "non-fatal" };
        writeln!(
            out,
            "  [{severity}] '{}' required by '{}': {}",
            missing.require_id, missing.required_by, missing.message
        )?;
    }
    Ok(())
}

fn write_list<W: Write>(out: &mut W, title: &str, items: &[String]) -> io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n{title}")?;
    for (index, item) in items.iter().enumerate() {
        writeln!(out, "  {}. {item}", index + 1)?;
    }
    Ok(())
}

fn write_errors<W: Write>(errors: &[BundleError], out: &mut W) -> io::Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nErrors")?;
    for error in errors {
        writeln!(out, "  [{}] {error}", error.code())?;
    }
    Ok(())
}

fn write_cycles<W: Write>(cycles: &[Vec<String>], out: &mut W) -> io::Result<()> {
    if cycles.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nCyclic groups")?;
    for group in cycles {
        writeln!(out, "  {}", group.join(" <-> "))?;
    }
    Ok(())
}

fn write_tree<W: Write>(analysis: &AnalysisResult, out: &mut W) -> io::Result<()> {
    let Some(entry) = &analysis.entry_module else {
        return Ok(());
    };
    writeln!(out, "\nDependency tree")?;
    writeln!(out, "  {}", entry.module_name())?;
    let mut path = FxHashSet::default();
    path.insert(entry.module_name().to_owned());
    write_children(analysis, entry.module_name(), 2, &mut path, out)
}

fn write_children<W: Write>(
    analysis: &AnalysisResult,
    module_name: &str,
    depth: usize,
    path: &mut FxHashSet<String>,
    out: &mut W,
) -> io::Result<()> {
    let Some(edges) = analysis.dependency_graph.get(module_name) else {
        return Ok(());
    };
    for edge in edges {
        let indent = "  ".repeat(depth);
        let marker = if edge.is_missing {
            " (missing)"
        } else if edge.is_external {
            " (external)"
        } else {
            ""
        };
        if !path.insert(edge.module_name.clone()) {
            writeln!(out, "{indent}{} (cycle)", edge.module_name)?;
            continue;
        }
        writeln!(out, "{indent}{}{marker}", edge.module_name)?;
        write_children(analysis, &edge.module_name, depth + 1, path, out)?;
        path.remove(&edge.module_name);
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}

/// Pretty JSON payload of the whole result
pub fn write_json<W: Write>(analysis: &AnalysisResult, out: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, analysis).context("Failed to serialize report")?;
    writeln!(out)?;
    Ok(())
}

/// Write the JSON report to `path`, creating parent directories
pub fn save_json(analysis: &AnalysisResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let mut buffer = Vec::new();
    write_json(analysis, &mut buffer)?;
    fs::write(path, buffer).with_context(|| format!("Failed to write report {}", path.display()))
}
