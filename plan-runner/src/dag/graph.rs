use std::collections::{HashMap, HashSet};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::plan::Phase;
use crate::error::PlanError;

/// Phase dependency graph. Edges run from a dependency to its dependent.
pub struct PhaseGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    /// Phase names in declaration order
    declared: Vec<String>,
}

impl PhaseGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            declared: vec![],
        }
    }

    /// Build the graph, rejecting duplicate names and unknown dependencies
    pub fn from_phases(phases: &[Phase]) -> Result<Self, PlanError> {
        let mut graph = Self::new();

        for phase in phases {
            graph.add_phase(&phase.name)?;
        }

        for phase in phases {
            for dep in &phase.depends_on {
                graph.add_dependency(&phase.name, dep)?;
            }
        }

        Ok(graph)
    }

    pub fn add_phase(&mut self, name: &str) -> Result<(), PlanError> {
        if self.indices.contains_key(name) {
            return Err(PlanError::Parse(format!("Duplicate phase name: {}", name)));
        }

        let idx = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), idx);
        self.declared.push(name.to_string());
        Ok(())
    }

    /// Add dependency: `phase` runs after `depends_on`
    pub fn add_dependency(&mut self, phase: &str, depends_on: &str) -> Result<(), PlanError> {
        let to_idx = *self.indices.get(phase)
            .ok_or_else(|| PlanError::PhaseNotFound(phase.to_string()))?;
        let from_idx = *self.indices.get(depends_on)
            .ok_or_else(|| PlanError::UnknownDependency {
                phase: phase.to_string(),
                dependency: depends_on.to_string(),
            })?;

        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Phases this phase depends on
    pub fn dependencies(&self, phase: &str) -> Vec<&str> {
        self.neighbors(phase, Direction::Incoming)
    }

    /// Phases that depend on this phase
    pub fn dependents(&self, phase: &str) -> Vec<&str> {
        self.neighbors(phase, Direction::Outgoing)
    }

    fn neighbors(&self, phase: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.indices.get(phase) else {
            return vec![];
        };

        let mut names: Vec<&str> = self.graph
            .neighbors_directed(idx, direction)
            .filter_map(|n| self.graph.node_weight(n).map(|s| s.as_str()))
            .collect();
        names.sort_by_key(|name| self.declared.iter().position(|d| d == name));
        names
    }

    /// Stable level-wise topological order.
    ///
    /// Each round takes, in declaration order, every remaining phase whose
    /// dependencies were all ordered in earlier rounds. A round with no
    /// candidates while phases remain means a cycle.
    pub fn execution_order(&self) -> Result<Vec<String>, PlanError> {
        let mut ordered: Vec<String> = Vec::with_capacity(self.declared.len());
        let mut done: HashSet<NodeIndex> = HashSet::new();
        let mut remaining: Vec<&String> = self.declared.iter().collect();

        while !remaining.is_empty() {
            let ready: Vec<NodeIndex> = remaining
                .iter()
                .map(|name| self.indices[name.as_str()])
                .filter(|&idx| {
                    self.graph
                        .neighbors_directed(idx, Direction::Incoming)
                        .all(|dep| done.contains(&dep))
                })
                .collect();

            if ready.is_empty() {
                return Err(PlanError::PhaseCycle {
                    phases: remaining.iter().map(|s| s.to_string()).collect(),
                });
            }

            for idx in &ready {
                done.insert(*idx);
                ordered.push(self.graph[*idx].clone());
            }
            remaining.retain(|name| !done.contains(&self.indices[name.as_str()]));
        }

        Ok(ordered)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

impl Default for PhaseGraph {
    fn default() -> Self {
        Self::new()
    }
}
