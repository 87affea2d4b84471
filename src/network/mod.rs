//! Construction of the per-year flow networks.
//!
//! - [`io_table`]: inter-country input-output tables and the industry
//!   network derived from them (financial, goods and transaction graphs)
//! - [`migration`]: bilateral migration inflows normalised by the working
//!   population of the origin country
//! - [`estimated`]: emigration totals redistributed along trade shares

pub mod estimated;
pub mod io_table;
pub mod migration;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use estimated::{estimated_migration, EstimatedMigrationOptions};
pub use io_table::{gfcf_by_country, FlowMatrix, IndustryNetwork, IoTable, IoTableOptions};
pub use migration::{MigrationFlow, MigrationNetworkBuilder, PopulationRecord};

/// Errors raised while deriving networks from source tables
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("{what} has {found} entries, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("missing {0} column in input-output table")]
    MissingColumn(String),

    #[error("{0} system is singular")]
    Singular(&'static str),

    #[error("input-output table has no industry with positive output")]
    NoOutput,
}

/// The flow networks built for every year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Input-side normalised I/O matrix `A`
    Financial,
    /// Output-side normalised I/O matrix `B`
    Goods,
    /// Raw interindustry transactions `Z`
    Transactions,
    /// Migration inflows per working-age inhabitant of the origin
    Human,
    /// Emigration redistributed along goods trade shares
    EstimatedHuman,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 5] = [
        NetworkKind::Financial,
        NetworkKind::Goods,
        NetworkKind::Transactions,
        NetworkKind::Human,
        NetworkKind::EstimatedHuman,
    ];

    /// Prefix of the panel columns holding this network's features
    pub fn prefix(self) -> &'static str {
        match self {
            NetworkKind::Financial => "financial",
            NetworkKind::Goods => "goods",
            NetworkKind::Transactions => "transactions",
            NetworkKind::Human => "human",
            NetworkKind::EstimatedHuman => "estimated_human",
        }
    }

    /// File stem of the persisted graph inside a year directory
    pub fn file_stem(self) -> &'static str {
        match self {
            NetworkKind::Financial => "A_country",
            NetworkKind::Goods => "B_country",
            NetworkKind::Transactions => "Z_country",
            NetworkKind::Human => "migration_network",
            NetworkKind::EstimatedHuman => "estimated_migration_network",
        }
    }

    /// Favor tolerance used when no override is configured
    pub fn default_tol_favor(self) -> f64 {
        match self {
            NetworkKind::Financial | NetworkKind::Goods | NetworkKind::Transactions => 1.0e-3,
            NetworkKind::Human | NetworkKind::EstimatedHuman => 0.0,
        }
    }

    /// The I/O matrix a network is derived from, if any
    pub fn flow_matrix(self) -> Option<FlowMatrix> {
        match self {
            NetworkKind::Financial => Some(FlowMatrix::A),
            NetworkKind::Goods => Some(FlowMatrix::B),
            NetworkKind::Transactions => Some(FlowMatrix::Z),
            NetworkKind::Human | NetworkKind::EstimatedHuman => None,
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
