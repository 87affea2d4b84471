//! Graph-level summaries stored next to the node features.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use super::CentralityError;
use crate::graph::FlowGraph;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub total_weight: f64,
    pub average_degree: f64,
    pub global_efficiency: f64,
}

impl GraphSummary {
    pub fn compute(graph: &FlowGraph) -> Result<Self, CentralityError> {
        Ok(Self {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            total_weight: graph.total_weight(),
            average_degree: average_degree(graph)?,
            global_efficiency: global_efficiency(graph)?,
        })
    }

    /// Key/value pairs written as graph attributes
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("nodes", self.nodes.to_string()),
            ("edges", self.edges.to_string()),
            ("total_weight", format!("{:?}", self.total_weight)),
            ("average_degree", format!("{:?}", self.average_degree)),
            ("global_efficiency", format!("{:?}", self.global_efficiency)),
        ]
    }
}

/// Mean weighted degree (in + out) per node
pub fn average_degree(graph: &FlowGraph) -> Result<f64, CentralityError> {
    if graph.is_empty() {
        return Err(CentralityError::EmptyGraph);
    }
    Ok(2.0 * graph.total_weight() / graph.node_count() as f64)
}

#[derive(Debug, PartialEq)]
struct Frontier {
    distance: f64,
    node: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on distance
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Weighted global efficiency.
///
/// Heavier edges are shorter: an edge of weight `w` has length
/// `total_weight / w`. The inverse shortest-path lengths of all reachable
/// ordered pairs are summed and divided by the number of edges.
pub fn global_efficiency(graph: &FlowGraph) -> Result<f64, CentralityError> {
    if graph.is_empty() {
        return Err(CentralityError::EmptyGraph);
    }
    if graph.edges().iter().any(|e| e.weight < 0.0) {
        return Err(CentralityError::NegativeWeight);
    }

    let total_weight = graph.total_weight();
    if graph.edge_count() == 0 || total_weight <= 0.0 {
        return Ok(0.0);
    }

    let n = graph.node_count();
    let mut successors: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for edge in graph.edges() {
        if edge.weight > 0.0 {
            successors[edge.source].push((edge.target, total_weight / edge.weight));
        }
    }

    let mut efficiency = 0.0;
    for source in 0..n {
        let mut dist = vec![f64::INFINITY; n];
        let mut heap = BinaryHeap::new();
        dist[source] = 0.0;
        heap.push(Frontier { distance: 0.0, node: source });

        while let Some(Frontier { distance, node }) = heap.pop() {
            if distance > dist[node] {
                continue;
            }
            for &(next, length) in &successors[node] {
                let candidate = distance + length;
                if candidate < dist[next] {
                    dist[next] = candidate;
                    heap.push(Frontier { distance: candidate, node: next });
                }
            }
        }

        efficiency += dist
            .iter()
            .filter(|d| d.is_finite() && **d > 0.0)
            .map(|d| 1.0 / d)
            .sum::<f64>();
    }

    Ok(efficiency / graph.edge_count() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_average_degree_counts_both_endpoints() {
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "B", 3.0);
        graph.add_edge("B", "C", 1.0);
        assert_relative_eq!(average_degree(&graph).unwrap(), 8.0 / 3.0);
    }

    #[test]
    fn test_efficiency_of_a_chain() {
        // total weight 2, both edges have length 2; pairs A-B, B-C at 2, A-C at 4
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "B", 1.0);
        graph.add_edge("B", "C", 1.0);
        let expected = (0.5 + 0.5 + 0.25) / 2.0;
        assert_relative_eq!(global_efficiency(&graph).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_efficiency_prefers_heavy_detour() {
        // direct A->C is light (length 11), the heavy detour is 11/5 + 11/5
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "C", 1.0);
        graph.add_edge("A", "B", 5.0);
        graph.add_edge("B", "C", 5.0);
        let hop = 11.0 / 5.0;
        let expected = (1.0 / hop + 1.0 / hop + 1.0 / (2.0 * hop)) / 3.0;
        assert_relative_eq!(global_efficiency(&graph).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_edgeless_and_invalid_graphs() {
        let mut graph = FlowGraph::new();
        graph.add_node("A");
        assert_eq!(global_efficiency(&graph).unwrap(), 0.0);

        graph.add_edge("A", "B", -1.0);
        assert_eq!(global_efficiency(&graph).unwrap_err(), CentralityError::NegativeWeight);
        assert_eq!(average_degree(&FlowGraph::new()).unwrap_err(), CentralityError::EmptyGraph);
    }

    #[test]
    fn test_summary_attributes() {
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "B", 2.0);
        let summary = GraphSummary::compute(&graph).unwrap();
        assert_eq!(summary.edges, 1);
        let attrs = summary.attributes();
        assert!(attrs.contains(&("average_degree", "2.0".to_string())));
    }
}
