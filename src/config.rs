use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::centrality::CentralityConfig;
use crate::gmm::ArellanoBondConfig;
use crate::network::{EstimatedMigrationOptions, IoTableOptions, NetworkKind};
use crate::panel::PanelOptions;
use crate::sources::SourcePaths;

/// Pipeline configuration. Every section has defaults, so an empty file is
/// a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub years: YearRange,
    pub centrality: CentralityConfig,
    pub networks: NetworkSettings,
    pub sources: SourcePaths,
    pub panel: PanelOptions,
    pub gmm: ArellanoBondConfig,
}

/// Inclusive range of years processed by `build`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct YearRange {
    pub start: i64,
    pub end: i64,
}

impl Default for YearRange {
    fn default() -> Self {
        Self { start: 2005, end: 2015 }
    }
}

impl YearRange {
    pub fn years(&self) -> Vec<i64> {
        (self.start..=self.end).collect()
    }

    pub fn contains(&self, year: i64) -> bool {
        (self.start..=self.end).contains(&year)
    }
}

/// Which networks are built and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub enabled: Vec<NetworkKind>,
    /// Favor tolerance overrides per network
    pub tol_favor: BTreeMap<NetworkKind, f64>,
    pub estimated: EstimatedMigrationOptions,
    pub io_table: IoTableOptions,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            enabled: vec![NetworkKind::Financial, NetworkKind::Goods, NetworkKind::Human],
            tol_favor: BTreeMap::new(),
            estimated: EstimatedMigrationOptions::default(),
            io_table: IoTableOptions::default(),
        }
    }
}

impl NetworkSettings {
    pub fn is_enabled(&self, kind: NetworkKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn tol_favor(&self, kind: NetworkKind) -> f64 {
        self.tol_favor.get(&kind).copied().unwrap_or_else(|| kind.default_tol_favor())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.years.start > self.years.end {
            return Err(ValidationError::InvalidYears(format!(
                "start {} is after end {}",
                self.years.start, self.years.end
            )));
        }

        let c = &self.centrality;
        if c.tol_gfi < 0.0 {
            return Err(ValidationError::InvalidCentrality("tol_gfi cannot be negative".to_string()));
        }
        if c.bridging_horizon == 0 {
            return Err(ValidationError::InvalidCentrality(
                "bridging_horizon must be at least 1".to_string(),
            ));
        }
        if !(c.pagerank.alpha > 0.0 && c.pagerank.alpha < 1.0) {
            return Err(ValidationError::InvalidCentrality(format!(
                "pagerank alpha must lie in (0, 1), got {}",
                c.pagerank.alpha
            )));
        }
        if c.pagerank.tol < 0.0 || c.hits.tol < 0.0 {
            return Err(ValidationError::InvalidCentrality(
                "iteration tolerances cannot be negative".to_string(),
            ));
        }
        if c.pagerank.max_iter == 0 || c.hits.max_iter == 0 {
            return Err(ValidationError::InvalidCentrality("max_iter must be at least 1".to_string()));
        }

        if self.networks.enabled.is_empty() {
            return Err(ValidationError::InvalidNetwork("no network is enabled".to_string()));
        }
        if let Some((kind, tol)) = self.networks.tol_favor.iter().find(|(_, tol)| **tol < 0.0) {
            return Err(ValidationError::InvalidNetwork(format!(
                "tol_favor for {} cannot be negative ({})",
                kind, tol
            )));
        }

        if let Some((name, _)) = self.sources.templates().iter().find(|(_, t)| t.is_empty()) {
            return Err(ValidationError::InvalidSources(format!("{} file name cannot be empty", name)));
        }

        if self.panel.start_year > self.panel.end_year {
            return Err(ValidationError::InvalidPanel(format!(
                "start_year {} is after end_year {}",
                self.panel.start_year, self.panel.end_year
            )));
        }
        if let Some(kind) = self.panel.networks.iter().find(|k| !self.networks.is_enabled(**k)) {
            return Err(ValidationError::InvalidPanel(format!(
                "panel uses the {} network, which is not enabled",
                kind
            )));
        }

        self.gmm
            .validate()
            .map_err(|e| ValidationError::InvalidGmm(e.to_string()))?;

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid year range: {0}")]
    InvalidYears(String),
    #[error("Invalid centrality configuration: {0}")]
    InvalidCentrality(String),
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid source configuration: {0}")]
    InvalidSources(String),
    #[error("Invalid panel configuration: {0}")]
    InvalidPanel(String),
    #[error("Invalid GMM configuration: {0}")]
    InvalidGmm(String),
}
