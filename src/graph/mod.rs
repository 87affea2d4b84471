//! Directed weighted flow graphs.
//!
//! A [`FlowGraph`] keeps its nodes in insertion order. That order is the
//! row/column order of every adjacency matrix derived from the graph and of
//! every feature table computed on it.

pub mod gml;

use std::collections::HashMap;

use nalgebra::DMatrix;

/// A directed weighted edge between two node positions
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Directed weighted graph with a stable node ordering
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<FlowEdge>,
    edge_index: HashMap<(usize, usize), usize>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a labelled square matrix.
    ///
    /// Entry `(i, j)` becomes the edge `labels[i] -> labels[j]`. Zero and NaN
    /// entries produce no edge; every label becomes a node even when isolated.
    pub fn from_adjacency(labels: &[String], matrix: &DMatrix<f64>) -> Self {
        let mut graph = Self::new();
        for label in labels {
            graph.add_node(label);
        }
        let n = labels.len().min(matrix.nrows()).min(matrix.ncols());
        for i in 0..n {
            for j in 0..n {
                let w = matrix[(i, j)];
                if w != 0.0 && !w.is_nan() {
                    graph.set_edge_by_index(i, j, w);
                }
            }
        }
        graph
    }

    /// Add a node if it is not present yet and return its position
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&pos) = self.index.get(name) {
            return pos;
        }
        let pos = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), pos);
        pos
    }

    /// Set the weight of `source -> target`, creating nodes as needed.
    /// An existing edge has its weight replaced.
    pub fn add_edge(&mut self, source: &str, target: &str, weight: f64) {
        let s = self.add_node(source);
        let t = self.add_node(target);
        self.set_edge_by_index(s, t, weight);
    }

    /// Add `weight` to `source -> target`, creating the edge if absent
    pub fn accumulate_edge(&mut self, source: &str, target: &str, weight: f64) {
        let s = self.add_node(source);
        let t = self.add_node(target);
        match self.edge_index.get(&(s, t)) {
            Some(&e) => self.edges[e].weight += weight,
            None => self.set_edge_by_index(s, t, weight),
        }
    }

    fn set_edge_by_index(&mut self, source: usize, target: usize, weight: f64) {
        match self.edge_index.get(&(source, target)) {
            Some(&e) => self.edges[e].weight = weight,
            None => {
                self.edge_index.insert((source, target), self.edges.len());
                self.edges.push(FlowEdge { source, target, weight });
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Weight of `source -> target`, or `None` when there is no such edge
    pub fn edge_weight(&self, source: &str, target: &str) -> Option<f64> {
        let s = self.node_index(source)?;
        let t = self.node_index(target)?;
        self.edge_index.get(&(s, t)).map(|&e| self.edges[e].weight)
    }

    /// Sum of outgoing edge weights per node, in node order
    pub fn out_weights(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.nodes.len()];
        for edge in &self.edges {
            out[edge.source] += edge.weight;
        }
        out
    }

    /// Sum of all edge weights
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Dense adjacency matrix: `g[(i, j)]` is the weight of `i -> j`, 0 if absent
    pub fn adjacency_matrix(&self) -> DMatrix<f64> {
        let n = self.nodes.len();
        let mut g = DMatrix::zeros(n, n);
        for edge in &self.edges {
            g[(edge.source, edge.target)] = edge.weight;
        }
        g
    }

    /// Copy of the graph with every edge weight passed through `f`.
    /// Edges whose new weight is zero or NaN are dropped; nodes are kept.
    pub fn map_weights<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&str, &str, f64) -> f64,
    {
        let mut graph = Self::new();
        for node in &self.nodes {
            graph.add_node(node);
        }
        for edge in &self.edges {
            let w = f(&self.nodes[edge.source], &self.nodes[edge.target], edge.weight);
            if w != 0.0 && !w.is_nan() {
                graph.set_edge_by_index(edge.source, edge.target, w);
            }
        }
        graph
    }

    /// Copy of the graph restricted to the nodes for which `keep` holds.
    /// Relative node order is preserved.
    pub fn retain_nodes<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(usize, &str) -> bool,
    {
        let mut graph = Self::new();
        let mut remap = vec![None; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if keep(i, node) {
                remap[i] = Some(graph.add_node(node));
            }
        }
        for edge in &self.edges {
            if let (Some(s), Some(t)) = (remap[edge.source], remap[edge.target]) {
                graph.set_edge_by_index(s, t, edge.weight);
            }
        }
        graph
    }
}
