//! Node-level centrality features for flow networks.
//!
//! [`compute_features`] turns a [`FlowGraph`] into an immutable
//! [`FeatureTable`]: one [`NodeFeatures`] record per node, in graph order.
//! Each metric is computed as a whole column before the table is assembled,
//! so a failing algorithm can only ever leave its own column missing (NaN)
//! for every node, never a mix of stale and fresh values.

pub mod spectral;
pub mod structural;
pub mod summary;

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::graph::gml::GmlDocument;
use crate::graph::FlowGraph;

pub use spectral::{hits, pagerank, HitsParams, HitsScores, PageRankParams};
pub use structural::{bridging_centrality, favor_centrality, godfather_index, hhi_index, FavorMode, GfiSupport};
pub use summary::{average_degree, global_efficiency, GraphSummary};

/// Errors raised by the centrality engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CentralityError {
    #[error("cannot compute centrality for the null graph")]
    EmptyGraph,

    #[error("{algorithm} failed to converge in {iterations} iterations")]
    NotConverged { algorithm: &'static str, iterations: usize },

    #[error("edge weights must be non-negative")]
    NegativeWeight,
}

/// Supported node metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PageRank,
    Hubs,
    Authorities,
    Gfi,
    Bridging,
    InFavor,
    OutFavor,
    HhiIndex,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::PageRank,
        Metric::Hubs,
        Metric::Authorities,
        Metric::Gfi,
        Metric::Bridging,
        Metric::InFavor,
        Metric::OutFavor,
        Metric::HhiIndex,
    ];

    /// Attribute / column key of the metric
    pub fn key(self) -> &'static str {
        match self {
            Metric::PageRank => "pagerank",
            Metric::Hubs => "hubs",
            Metric::Authorities => "authorities",
            Metric::Gfi => "gfi",
            Metric::Bridging => "bridging",
            Metric::InFavor => "in_favor",
            Metric::OutFavor => "out_favor",
            Metric::HhiIndex => "hhi_index",
        }
    }

    pub fn from_key(key: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Centrality values of a single node. NaN marks a missing value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeFeatures {
    pub pagerank: f64,
    pub hubs: f64,
    pub authorities: f64,
    pub gfi: f64,
    pub bridging: f64,
    pub in_favor: f64,
    pub out_favor: f64,
    pub hhi_index: f64,
}

impl NodeFeatures {
    /// A record with every metric missing
    pub fn missing() -> Self {
        Self {
            pagerank: f64::NAN,
            hubs: f64::NAN,
            authorities: f64::NAN,
            gfi: f64::NAN,
            bridging: f64::NAN,
            in_favor: f64::NAN,
            out_favor: f64::NAN,
            hhi_index: f64::NAN,
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::PageRank => self.pagerank,
            Metric::Hubs => self.hubs,
            Metric::Authorities => self.authorities,
            Metric::Gfi => self.gfi,
            Metric::Bridging => self.bridging,
            Metric::InFavor => self.in_favor,
            Metric::OutFavor => self.out_favor,
            Metric::HhiIndex => self.hhi_index,
        }
    }

    fn slot(&mut self, metric: Metric) -> &mut f64 {
        match metric {
            Metric::PageRank => &mut self.pagerank,
            Metric::Hubs => &mut self.hubs,
            Metric::Authorities => &mut self.authorities,
            Metric::Gfi => &mut self.gfi,
            Metric::Bridging => &mut self.bridging,
            Metric::InFavor => &mut self.in_favor,
            Metric::OutFavor => &mut self.out_favor,
            Metric::HhiIndex => &mut self.hhi_index,
        }
    }
}

/// A recovered failure during feature computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWarning {
    /// Metrics that were filled with missing values
    pub metrics: Vec<Metric>,
    pub message: String,
}

/// Immutable per-node feature table for one graph
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    nodes: Vec<String>,
    rows: Vec<NodeFeatures>,
    warnings: Vec<FeatureWarning>,
}

impl FeatureTable {
    /// Assemble a table from whole metric columns. Metrics without a column
    /// (or with a column of the wrong length) are missing for every node.
    pub fn from_columns(
        nodes: Vec<String>,
        columns: &BTreeMap<Metric, Vec<f64>>,
        warnings: Vec<FeatureWarning>,
    ) -> Self {
        let mut rows = vec![NodeFeatures::missing(); nodes.len()];
        for (&metric, values) in columns {
            if values.len() != nodes.len() {
                log::warn!(
                    "Column {} has {} values for {} nodes; leaving it missing",
                    metric,
                    values.len(),
                    nodes.len()
                );
                continue;
            }
            for (row, &v) in rows.iter_mut().zip(values) {
                *row.slot(metric) = v;
            }
        }
        Self { nodes, rows, warnings }
    }

    /// Read a table back from the node attributes of a persisted graph
    pub fn from_document(doc: &GmlDocument) -> Self {
        let nodes = doc.graph.nodes().to_vec();
        let rows = nodes
            .iter()
            .map(|node| {
                let mut features = NodeFeatures::missing();
                if let Some(attrs) = doc.node_attributes(node) {
                    for metric in Metric::ALL {
                        if let Some(&v) = attrs.get(metric.key()) {
                            *features.slot(metric) = v;
                        }
                    }
                }
                features
            })
            .collect();
        Self {
            nodes,
            rows,
            warnings: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn warnings(&self) -> &[FeatureWarning] {
        &self.warnings
    }

    pub fn get(&self, node: &str) -> Option<&NodeFeatures> {
        self.nodes.iter().position(|n| n == node).map(|i| &self.rows[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeFeatures)> {
        self.nodes.iter().map(String::as_str).zip(self.rows.iter())
    }

    /// One metric for every node, in node order
    pub fn column(&self, metric: Metric) -> Vec<f64> {
        self.rows.iter().map(|r| r.get(metric)).collect()
    }

    /// Node attribute map suitable for [`GmlDocument::node_attributes`]
    pub fn to_node_attributes(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.iter()
            .map(|(node, features)| {
                let attrs = Metric::ALL
                    .into_iter()
                    .map(|m| (m.key().to_string(), features.get(m)))
                    .collect();
                (node.to_string(), attrs)
            })
            .collect()
    }
}

/// Tunables of the centrality engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralityConfig {
    /// Weight below which two predecessors count as unconnected
    pub tol_gfi: f64,
    pub gfi_support: GfiSupport,
    pub favor_mode: FavorMode,
    /// Decay scalar applied to the matrix before taking walk powers
    pub bridging_p: f64,
    /// Longest walk length considered by bridging centrality
    pub bridging_horizon: usize,
    /// Zero the diagonal before computing any metric
    pub exclude_self_loops: bool,
    pub pagerank: PageRankParams,
    pub hits: HitsParams,
}

impl Default for CentralityConfig {
    fn default() -> Self {
        Self {
            tol_gfi: 1.0e-10,
            gfi_support: GfiSupport::default(),
            favor_mode: FavorMode::default(),
            bridging_p: 1.0,
            bridging_horizon: 5,
            exclude_self_loops: true,
            pagerank: PageRankParams::default(),
            hits: HitsParams::default(),
        }
    }
}

/// Adjacency matrix as seen by the engine
pub fn engine_matrix(graph: &FlowGraph, config: &CentralityConfig) -> DMatrix<f64> {
    let mut g = graph.adjacency_matrix();
    if config.exclude_self_loops {
        g.fill_diagonal(0.0);
    }
    g
}

/// Compute every [`Metric`] for every node of `graph`.
///
/// PageRank and HITS non-convergence is recovered: the affected columns are
/// missing for all nodes and a [`FeatureWarning`] is recorded. An empty graph
/// is a hard error.
pub fn compute_features(
    graph: &FlowGraph,
    config: &CentralityConfig,
    tol_favor: f64,
) -> Result<FeatureTable, CentralityError> {
    if graph.is_empty() {
        return Err(CentralityError::EmptyGraph);
    }

    let g = engine_matrix(graph, config);
    let mut columns = BTreeMap::new();
    let mut warnings = Vec::new();

    match pagerank(&g, &config.pagerank) {
        Ok(pr) => {
            columns.insert(Metric::PageRank, pr);
        }
        Err(err @ CentralityError::NotConverged { .. }) => {
            log::warn!("PageRank marked missing: {}", err);
            warnings.push(FeatureWarning {
                metrics: vec![Metric::PageRank],
                message: err.to_string(),
            });
        }
        Err(err) => return Err(err),
    }

    match hits(&g, &config.hits) {
        Ok(scores) => {
            columns.insert(Metric::Hubs, scores.hubs);
            columns.insert(Metric::Authorities, scores.authorities);
        }
        Err(err @ CentralityError::NotConverged { .. }) => {
            log::warn!("HITS hubs/authorities marked missing: {}", err);
            warnings.push(FeatureWarning {
                metrics: vec![Metric::Hubs, Metric::Authorities],
                message: err.to_string(),
            });
        }
        Err(err) => return Err(err),
    }

    columns.insert(Metric::Gfi, godfather_index(&g, config.tol_gfi, config.gfi_support)?);
    columns.insert(
        Metric::Bridging,
        bridging_centrality(&g, config.bridging_p, config.bridging_horizon)?,
    );
    columns.insert(Metric::OutFavor, favor_centrality(&g, tol_favor, config.favor_mode)?);
    columns.insert(
        Metric::InFavor,
        favor_centrality(&g.transpose(), tol_favor, config.favor_mode)?,
    );
    columns.insert(Metric::HhiIndex, hhi_index(&g)?);

    log::debug!(
        "Computed {} metrics for {} nodes ({} warnings)",
        columns.len(),
        graph.node_count(),
        warnings.len()
    );

    Ok(FeatureTable::from_columns(graph.nodes().to_vec(), &columns, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> FlowGraph {
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "B", 1.0);
        graph.add_edge("B", "C", 2.0);
        graph.add_edge("C", "A", 3.0);
        graph.add_edge("A", "C", 1.0);
        graph
    }

    #[test]
    fn test_empty_graph_is_fatal() {
        let err = compute_features(&FlowGraph::new(), &CentralityConfig::default(), 0.0).unwrap_err();
        assert_eq!(err, CentralityError::EmptyGraph);
    }

    #[test]
    fn test_all_metrics_present_on_regular_graph() {
        let table = compute_features(&triangle(), &CentralityConfig::default(), 0.0).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.warnings().is_empty());
        for (_, features) in table.iter() {
            for metric in Metric::ALL {
                assert!(features.get(metric).is_finite(), "{} missing", metric);
            }
        }
        let pr_sum: f64 = table.column(Metric::PageRank).iter().sum();
        assert!((pr_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_convergence_marks_whole_column_missing() {
        let config = CentralityConfig {
            pagerank: PageRankParams {
                max_iter: 1,
                tol: 1e-300,
                ..PageRankParams::default()
            },
            ..CentralityConfig::default()
        };
        let table = compute_features(&triangle(), &config, 0.0).unwrap();
        assert!(table.column(Metric::PageRank).iter().all(|v| v.is_nan()));
        assert!(table.column(Metric::Gfi).iter().all(|v| v.is_finite()));
        assert_eq!(table.warnings().len(), 1);
        assert_eq!(table.warnings()[0].metrics, vec![Metric::PageRank]);
    }

    #[test]
    fn test_self_loops_only_graph() {
        let mut graph = FlowGraph::new();
        graph.add_edge("A", "A", 2.0);
        graph.add_edge("B", "B", 3.0);
        graph.add_edge("C", "C", 4.0);

        let table = compute_features(&graph, &CentralityConfig::default(), 0.0).unwrap();
        for metric in [Metric::Gfi, Metric::Bridging, Metric::InFavor, Metric::OutFavor] {
            assert_eq!(table.column(metric), vec![0.0; 3], "{}", metric);
        }
        // no off-diagonal weight: HITS has nothing to rank, HHI has no distribution
        assert!(table.column(Metric::Hubs).iter().all(|v| v.is_nan()));
        assert!(table.column(Metric::HhiIndex).iter().all(|v| v.is_nan()));
        assert_eq!(table.warnings().len(), 1);
    }

    #[test]
    fn test_metric_keys_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::from_key(metric.key()), Some(metric));
        }
        assert_eq!(Metric::from_key("favor"), None);
    }

    #[test]
    fn test_from_document_fills_missing_keys_with_nan() {
        let graph = triangle();
        let table = compute_features(&graph, &CentralityConfig::default(), 0.0).unwrap();
        let mut doc = GmlDocument::new(graph);
        doc.node_attributes = table.to_node_attributes();
        doc.node_attributes.get_mut("B").unwrap().remove("gfi");

        let back = FeatureTable::from_document(&doc);
        assert_eq!(back.get("A"), table.get("A"));
        assert!(back.get("B").unwrap().gfi.is_nan());
        assert_eq!(back.get("B").unwrap().hubs, table.get("B").unwrap().hubs);
    }

    #[test]
    fn test_from_columns_rejects_misaligned_column() {
        let columns = BTreeMap::from([(Metric::Gfi, vec![1.0]), (Metric::Bridging, vec![1.0, 2.0])]);
        let table = FeatureTable::from_columns(vec!["A".into(), "B".into()], &columns, Vec::new());
        assert!(table.get("A").unwrap().gfi.is_nan());
        assert_eq!(table.get("B").unwrap().bridging, 2.0);
    }
}
