//! Dependency graph of one bundling run
//!
//! Nodes are keyed by absolute file path and kept in insertion order, which is
//! the depth-first discovery order of the analyzer. Missing modules never get
//! a node; they only show up as edges.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, trace};
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::FxHashMap;

use crate::{
    error::{BundleError, BundleResult},
    types::{DependencyEdge, ModuleRecord},
};

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub module: ModuleRecord,
    /// Edges in require order; ignored requires are already dropped
    pub dependencies: Vec<DependencyEdge>,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: IndexMap<PathBuf, GraphNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path
    Visiting,
    /// Fully processed and emitted
    Done,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_path: PathBuf, node: GraphNode) {
        self.nodes.insert(file_path, node);
    }

    pub fn get(&self, file_path: &Path) -> Option<&GraphNode> {
        self.nodes.get(file_path)
    }

    pub fn contains(&self, file_path: &Path) -> bool {
        self.nodes.contains_key(file_path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &GraphNode)> {
        self.nodes.iter().map(|(path, node)| (path.as_path(), node))
    }

    /// Order modules so that every module follows its dependencies
    ///
    /// Roots are visited in insertion order, so the entry (inserted first)
    /// is emitted last. Reaching a node that is still on the DFS path is a
    /// cycle; the error names the modules along it.
    pub fn topological_sort(&self) -> BundleResult<Vec<&ModuleRecord>> {
        let mut colors: FxHashMap<&Path, Color> = FxHashMap::default();
        let mut path = Vec::new();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        for file_path in self.nodes.keys() {
            if !colors.contains_key(file_path.as_path()) {
                self.visit(file_path, &mut colors, &mut path, &mut sorted)?;
            }
        }

        debug!("Topological order contains {} module(s)", sorted.len());
        Ok(sorted)
    }

    fn visit<'a>(
        &'a self,
        file_path: &'a Path,
        colors: &mut FxHashMap<&'a Path, Color>,
        path: &mut Vec<&'a Path>,
        sorted: &mut Vec<&'a ModuleRecord>,
    ) -> BundleResult<()> {
        match colors.get(file_path) {
            Some(Color::Done) => return Ok(()),
            Some(Color::Visiting) => {
                return Err(BundleError::CircularDependency {
                    path: self.cycle_path(path, file_path),
                });
            }
            None => {}
        }

        colors.insert(file_path, Color::Visiting);
        path.push(file_path);

        let node = self.nodes.get(file_path);
        if let Some(node) = node {
            for dependency in &node.dependencies {
                if let Some(dependency_path) = dependency.file_path.as_deref() {
                    trace!(
                        "Visiting {} from {}",
                        dependency.module_name,
                        node.module.module_name()
                    );
                    self.visit(dependency_path, colors, path, sorted)?;
                }
            }
        }

        path.pop();
        colors.insert(file_path, Color::Done);
        if let Some(node) = node {
            sorted.push(&node.module);
        }
        Ok(())
    }

    /// Module names from the first occurrence of `repeated` to the end of the
    /// DFS path, closed with `repeated` again
    fn cycle_path(&self, path: &[&Path], repeated: &Path) -> Vec<String> {
        let start = path
            .iter()
            .position(|entry| *entry == repeated)
            .unwrap_or_default();
        path[start..]
            .iter()
            .chain(std::iter::once(&repeated))
            .map(|file_path| self.display_name(file_path))
            .collect()
    }

    fn display_name(&self, file_path: &Path) -> String {
        self.nodes.get(file_path).map_or_else(
            || file_path.display().to_string(),
            |node| node.module.module_name().to_owned(),
        )
    }

    /// Every group of mutually dependent modules, by logical name
    ///
    /// Includes self-requiring modules. Used for diagnostics once the sort has
    /// reported the first cycle it ran into.
    pub fn cyclic_groups(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&Path, ()> = DiGraph::new();
        let indices: FxHashMap<&Path, _> = self
            .nodes
            .keys()
            .map(|path| (path.as_path(), graph.add_node(path.as_path())))
            .collect();

        let mut self_loops = Vec::new();
        for (file_path, node) in &self.nodes {
            let from = indices[file_path.as_path()];
            for dependency in &node.dependencies {
                let Some(to) = dependency
                    .file_path
                    .as_deref()
                    .and_then(|path| indices.get(path))
                else {
                    continue;
                };
                if from == *to {
                    self_loops.push(from);
                }
                graph.add_edge(from, *to, ());
            }
        }

        let mut groups: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1 || self_loops.contains(&component[0]))
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|index| self.display_name(graph[index]))
                    .collect();
                names.sort();
                names
            })
            .collect();
        groups.sort();
        groups
    }
}
