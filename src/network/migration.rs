//! Bilateral migration network.
//!
//! Inflows are divided by the working-age population of the origin, so an
//! edge weight is a migration rate rather than a head count.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::graph::FlowGraph;

/// One bilateral inflow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFlow {
    pub country_from: String,
    pub country_to: String,
    pub weight: f64,
}

/// Population of one country in one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub country: String,
    /// Persons
    pub population: f64,
    /// Share of the population of working age, in percent
    pub working_share: Option<f64>,
}

impl PopulationRecord {
    /// Working-age head count, if the share is known
    pub fn working_population(&self) -> Option<f64> {
        self.working_share.map(|pct| self.population * pct / 100.0)
    }
}

/// Working-age population by country. Countries without a known share are
/// left out.
pub fn working_population_index(records: &[PopulationRecord]) -> HashMap<String, f64> {
    records
        .iter()
        .filter_map(|r| r.working_population().map(|w| (r.country.clone(), w)))
        .collect()
}

/// Builds the migration graph of one year
#[derive(Debug, Clone)]
pub struct MigrationNetworkBuilder {
    reference_nodes: Option<BTreeSet<String>>,
    row_label: String,
}

impl Default for MigrationNetworkBuilder {
    fn default() -> Self {
        Self {
            reference_nodes: None,
            row_label: "ROW".to_string(),
        }
    }
}

impl MigrationNetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Countries outside this set are merged into the rest-of-world node
    pub fn with_reference_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_nodes = Some(nodes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_row_label(mut self, label: &str) -> Self {
        self.row_label = label.to_string();
        self
    }

    fn resolve<'a>(&'a self, country: &'a str) -> &'a str {
        match &self.reference_nodes {
            Some(nodes) if !nodes.contains(country) => self.row_label.as_str(),
            _ => country,
        }
    }

    /// Normalise, map unknown countries to the rest of the world, sum
    /// duplicates and build the graph.
    ///
    /// Records whose origin has no working population (or whose rate is not
    /// finite) are dropped.
    pub fn build(&self, flows: &[MigrationFlow], working_population: &HashMap<String, f64>) -> FlowGraph {
        let mut aggregated: BTreeMap<(String, String), f64> = BTreeMap::new();
        let mut unresolved = 0usize;
        let mut mapped = BTreeSet::new();

        for flow in flows {
            let rate = working_population
                .get(&flow.country_from)
                .map(|&wkn| flow.weight / wkn)
                .filter(|r| r.is_finite());
            let Some(rate) = rate else {
                unresolved += 1;
                continue;
            };

            let from = self.resolve(&flow.country_from);
            let to = self.resolve(&flow.country_to);
            for (raw, resolved) in [(&flow.country_from, from), (&flow.country_to, to)] {
                if raw != resolved {
                    mapped.insert(raw.clone());
                }
            }
            *aggregated.entry((from.to_string(), to.to_string())).or_insert(0.0) += rate;
        }

        if unresolved > 0 {
            log::warn!("Dropped {} migration records without origin working population", unresolved);
        }
        if !mapped.is_empty() {
            log::info!("Mapped {} countries to {}", mapped.len(), self.row_label);
        }

        let mut graph = FlowGraph::new();
        for ((from, to), weight) in aggregated {
            graph.add_edge(&from, &to, weight);
        }
        graph
    }
}
