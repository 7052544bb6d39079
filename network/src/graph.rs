//! Weighted directed topology graph.
//!
//! Written by the coordinator as links are measured; read when several
//! peers can serve the same chain, to fetch it from the nearest one.

use std::collections::{BTreeMap, HashMap};

/// Directed graph of peer identities with weighted edges (lower is closer,
/// e.g. round-trip latency in milliseconds).
#[derive(Debug, Default, Clone)]
pub struct NetworkGraph {
    /// from -> (to -> weight). `BTreeMap` keeps iteration deterministic.
    edges: HashMap<String, BTreeMap<String, u64>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.edges.entry(id.to_string()).or_default();
    }

    /// Drop a node together with every edge pointing at it.
    pub fn remove_node(&mut self, id: &str) {
        self.edges.remove(id);
        for targets in self.edges.values_mut() {
            targets.remove(id);
        }
    }

    /// Add or reweight `from -> to`. Both endpoints become nodes.
    pub fn add_edge(&mut self, from: &str, to: &str, weight: u64) {
        self.add_node(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), weight);
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        self.edges
            .get_mut(from)
            .is_some_and(|t| t.remove(to).is_some())
    }

    pub fn weight(&self, from: &str, to: &str) -> Option<u64> {
        self.edges.get(from)?.get(to).copied()
    }

    pub fn neighbors(&self, id: &str) -> Vec<(String, u64)> {
        self.edges
            .get(id)
            .map(|t| t.iter().map(|(k, w)| (k.clone(), *w)).collect())
            .unwrap_or_default()
    }

    /// The out-neighbour with the lowest edge weight (ties by id).
    pub fn closest_node(&self, from: &str) -> Option<String> {
        self.edges
            .get(from)?
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, _)| id.clone())
    }

    /// Up to `k` out-neighbours ordered by weight (ties by id).
    pub fn fanout(&self, from: &str, k: usize) -> Vec<String> {
        let mut targets = self.neighbors(from);
        targets.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        targets.into_iter().take(k).map(|(id, _)| id).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkGraph {
        let mut g = NetworkGraph::new();
        g.add_edge("a", "b", 30);
        g.add_edge("a", "c", 10);
        g.add_edge("a", "d", 20);
        g.add_edge("b", "a", 5);
        g
    }

    #[test]
    fn closest_node_uses_lowest_weight() {
        let g = sample();
        assert_eq!(g.closest_node("a").as_deref(), Some("c"));
        assert_eq!(g.closest_node("c"), None);
        assert_eq!(g.closest_node("zz"), None);
    }

    #[test]
    fn fanout_orders_and_truncates() {
        let g = sample();
        assert_eq!(g.fanout("a", 2), vec!["c".to_string(), "d".to_string()]);
        assert_eq!(g.fanout("a", 10).len(), 3);
    }

    #[test]
    fn edges_are_directed() {
        let g = sample();
        assert_eq!(g.weight("a", "b"), Some(30));
        assert_eq!(g.weight("b", "a"), Some(5));
        assert_eq!(g.weight("c", "a"), None);
    }

    #[test]
    fn remove_node_drops_incoming_edges() {
        let mut g = sample();
        g.remove_node("c");
        assert!(!g.contains("c"));
        assert_eq!(g.closest_node("a").as_deref(), Some("d"));
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn reweighting_replaces_edge() {
        let mut g = sample();
        g.add_edge("a", "b", 1);
        assert_eq!(g.closest_node("a").as_deref(), Some("b"));
        assert_eq!(g.edge_count(), 4);
        assert!(g.remove_edge("a", "b"));
        assert!(!g.remove_edge("a", "b"));
    }
}
