//! # Netpanel - Flow-network centralities and dynamic panel estimation
//!
//! This library turns yearly cross-country flow tables into directed
//! weighted networks, describes every country by a set of centralities,
//! stacks those descriptions into a (country, year) panel and estimates
//! dynamic panel models on it with Arellano-Bond / System GMM.
//!
//! ## Architecture
//!
//! - `graph`: directed weighted flow graph and its GML persistence
//! - `centrality`: PageRank, HITS, godfather index, bridging, favor and HHI
//!   centralities plus graph-level summaries
//! - `network`: financial, goods and transaction networks from
//!   input-output tables, migration and estimated migration networks
//! - `panel`: long panel store, lags/deltas, Yeo-Johnson transform and
//!   panel assembly
//! - `gmm`: instrument construction, sample selection and two-step
//!   clustered GMM
//! - `sources` / `tables`: CSV source readers and Parquet persistence
//! - `config` / `config_loader`: YAML configuration
//! - `pipeline`: the yearly batch and the panel build
//! - `report`: JSON and text estimation reports
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use netpanel::{config_loader, pipeline};
//!
//! let config = config_loader::load_config(Path::new("netpanel.yaml"))?;
//! let panel = pipeline::build(Path::new("raw"), Path::new("processed"), &config)?;
//! println!("{} panel rows", panel.len());
//! # Ok::<(), color_eyre::Report>(())
//! ```

pub mod centrality;
pub mod config;
pub mod config_loader;
pub mod gmm;
pub mod graph;
pub mod network;
pub mod panel;
pub mod pipeline;
pub mod report;
pub mod sources;
pub mod tables;

pub use centrality::{compute_features, CentralityConfig, CentralityError, FeatureTable, Metric};
pub use config::{Config, ValidationError};
pub use gmm::{arellano_bond, ArellanoBondConfig, DynamicPanelData, GmmError, GmmResult};
pub use graph::FlowGraph;
pub use network::{NetworkError, NetworkKind};
pub use panel::{Panel, PanelError, PanelKey};
