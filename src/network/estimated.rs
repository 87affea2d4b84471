//! Emigration pressure redistributed along trade partners.
//!
//! When no bilateral migration data exists, each country's national
//! emigration rate is spread over its goods-trade partners in proportion to
//! their share of its outgoing trade weight.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::graph::FlowGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatedMigrationOptions {
    /// Country whose edges are removed before redistribution
    pub excluded_country: String,
}

impl Default for EstimatedMigrationOptions {
    fn default() -> Self {
        Self {
            excluded_country: "ROW".to_string(),
        }
    }
}

/// Build the estimated migration graph from a goods graph.
///
/// Self-loops and every edge touching the excluded country are dropped,
/// then the edge `u -> v` gets `w(u,v) · rate(u) / out(u)`. Missing rates
/// count as zero. Nodes left without outgoing weight are removed.
pub fn estimated_migration(
    goods: &FlowGraph,
    emigration_rates: &HashMap<String, f64>,
    options: &EstimatedMigrationOptions,
) -> FlowGraph {
    let excluded = options.excluded_country.as_str();
    let trimmed = goods.map_weights(|from, to, w| {
        if from == to || from == excluded || to == excluded {
            0.0
        } else {
            w
        }
    });

    let out = trimmed.out_weights();
    let mut missing = 0usize;
    let rates: Vec<f64> = trimmed
        .nodes()
        .iter()
        .map(|node| {
            emigration_rates.get(node).copied().unwrap_or_else(|| {
                missing += 1;
                0.0
            })
        })
        .collect();
    if missing > 0 {
        log::warn!("{} countries have no emigration rate; treating as zero", missing);
    }

    let scaled = trimmed.map_weights(|from, _, w| {
        let i = trimmed.node_index(from).unwrap_or_default();
        if out[i] > 0.0 {
            w * rates[i] / out[i]
        } else {
            0.0
        }
    });

    let remaining = scaled.out_weights();
    scaled.retain_nodes(|i, _| remaining[i] > 0.0)
}
