//! The directed method call graph.
//!
//! Backed by `petgraph::graph::DiGraph`, the same representation the
//! `drift-analysis`/`drift-core` crates in the retrieval pack use for
//! function-level call graphs (`call_graph::types::CallGraph`,
//! `graph::impact::blast_radius::transitive_callers`) — a node per method,
//! forward edges for calls, reverse neighbor iteration for "who reaches
//! this."

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::method_id::MethodId;

/// `G = (V, E)` where `V ⊂ MethodId` and `E = { (caller → callee) }`.
///
/// Invariants maintained by construction: every edge endpoint is a node in
/// `V`; self-loops are permitted (recursion); duplicate edges are
/// suppressed (an edge is only inserted once per `(caller, callee)` pair).
#[derive(Debug, Default)]
pub struct CallGraph {
    graph: DiGraph<MethodId, ()>,
    index_of: HashMap<MethodId, NodeIndex>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id` as a vertex if it isn't already present. Idempotent.
    pub fn add_vertex(&mut self, id: MethodId) -> NodeIndex {
        if let Some(&idx) = self.index_of.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index_of.insert(id, idx);
        idx
    }

    /// Adds the edge `caller → callee`, inserting either endpoint as a
    /// vertex if needed. No-op if the edge already exists — no duplicate
    /// edges per `(caller, callee)` pair.
    pub fn add_edge(&mut self, caller: MethodId, callee: MethodId) {
        let from = self.add_vertex(caller);
        let to = self.add_vertex(callee);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, id: &MethodId) -> bool {
        self.index_of.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &MethodId> {
        self.index_of.keys()
    }

    fn index(&self, id: &MethodId) -> Option<NodeIndex> {
        self.index_of.get(id).copied()
    }

    /// Direct callees of `id`: `succ(u)`.
    pub fn succ(&self, id: &MethodId) -> Vec<MethodId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct callers of `id`: `pred(u)`.
    pub fn pred(&self, id: &MethodId) -> Vec<MethodId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &MethodId, dir: Direction) -> Vec<MethodId> {
        let Some(idx) = self.index(id) else { return Vec::new() };
        self.graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Every vertex reachable from `start` via `succ`-edges, each paired
    /// with its BFS depth and immediate predecessor on the shortest path
    /// found, bounded to `max_depth` hops. Used by `CoverageIndex`.
    pub fn bounded_bfs(&self, start: &MethodId, max_depth: u32) -> HashMap<MethodId, (u32, MethodId)> {
        let mut result = HashMap::new();
        let Some(start_idx) = self.index(start) else { return result };

        let mut frontier = vec![start_idx];
        let mut visited = std::collections::HashSet::new();
        visited.insert(start_idx);
        let mut depth = 0u32;

        // Frontier is processed in lexicographic MethodId order so that
        // when two callers at the same depth both reach a new node for the
        // first time, the recorded predecessor is deterministic: ties are
        // broken by lexicographic MethodId order.
        frontier.sort_by_key(|&n| self.graph[n].clone());

        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for &node in &frontier {
                let caller_id = self.graph[node].clone();
                let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(node, Direction::Outgoing).collect();
                neighbors.sort_by_key(|&n| self.graph[n].clone());
                for neighbor in neighbors {
                    if visited.insert(neighbor) {
                        result.insert(self.graph[neighbor].clone(), (depth + 1, caller_id.clone()));
                        next.push(neighbor);
                    }
                }
            }
            next.sort_by_key(|&n| self.graph[n].clone());
            frontier = next;
            depth += 1;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MethodId {
        MethodId::new(s)
    }

    #[test]
    fn add_edge_creates_missing_vertices() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("B"));
        assert!(graph.contains(&id("A")));
        assert!(graph.contains(&id("B")));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn duplicate_edges_are_suppressed() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("B"));
        graph.add_edge(id("A"), id("B"));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn self_loops_are_permitted() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("A"));
        assert_eq!(graph.succ(&id("A")), vec![id("A")]);
    }

    #[test]
    fn succ_and_pred_are_symmetric() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("B"));
        assert_eq!(graph.succ(&id("A")), vec![id("B")]);
        assert_eq!(graph.pred(&id("B")), vec![id("A")]);
        assert!(graph.pred(&id("A")).is_empty());
    }

    #[test]
    fn bounded_bfs_respects_depth_cap() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("B"));
        graph.add_edge(id("B"), id("C"));
        graph.add_edge(id("C"), id("D"));

        let reached = graph.bounded_bfs(&id("A"), 2);
        assert!(reached.contains_key(&id("B")));
        assert!(reached.contains_key(&id("C")));
        assert!(!reached.contains_key(&id("D")));
        assert_eq!(reached[&id("B")].0, 1);
        assert_eq!(reached[&id("C")].0, 2);
    }

    #[test]
    fn bounded_bfs_on_cycle_terminates() {
        let mut graph = CallGraph::new();
        graph.add_edge(id("A"), id("B"));
        graph.add_edge(id("B"), id("A"));

        let reached = graph.bounded_bfs(&id("A"), 5);
        assert_eq!(reached.len(), 1);
        assert!(reached.contains_key(&id("B")));
    }
}
