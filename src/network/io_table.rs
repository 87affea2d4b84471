//! Inter-country input-output tables.
//!
//! Row and column labels follow the `CCC_SECTOR` convention: industries are
//! `AUS_01T03`, final-demand columns `AUS_HFCE`, tax rows `AUS_TAXSUB`, and
//! the plain `VALU`, `OUTPUT` and `TOTAL` rows/columns carry value added and
//! gross output.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::NetworkError;
use crate::graph::FlowGraph;

const DEMAND_VARS: [&str; 6] = ["HFCE", "NPISH", "GGFC", "GFCF", "INVNT", "P33"];
const SUPPLY_VARS: [&str; 4] = ["TAXSUB", "VALU", "OUTPUT", "TOTAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Industry,
    FinalDemand,
    Supply,
}

fn suffix(label: &str) -> &str {
    label.rsplit_once('_').map_or(label, |(_, s)| s)
}

fn label_kind(label: &str) -> LabelKind {
    let s = suffix(label);
    if DEMAND_VARS.contains(&s) {
        LabelKind::FinalDemand
    } else if SUPPLY_VARS.contains(&s) {
        LabelKind::Supply
    } else {
        LabelKind::Industry
    }
}

fn country_code(label: &str) -> String {
    label.chars().take(3).collect()
}

/// How raw labels are harmonised before the table is split up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoTableOptions {
    /// Collapse country-industry labels to their three-letter country code
    pub by_country: bool,
    /// Sub-country codes replaced by their ISO3 country
    pub aggregation: BTreeMap<String, String>,
}

impl Default for IoTableOptions {
    fn default() -> Self {
        let aggregation = [("MX1", "MEX"), ("MX2", "MEX"), ("CN1", "CHN"), ("CN2", "CHN")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            by_country: true,
            aggregation,
        }
    }
}

impl IoTableOptions {
    fn rename(&self, label: &str) -> String {
        let mut out = label.to_string();
        for (from, to) in &self.aggregation {
            out = out.replace(from.as_str(), to);
        }
        if self.by_country && label_kind(&out) == LabelKind::Industry {
            out = country_code(&out);
        }
        out
    }
}

/// A labelled input-output table as read from disk
#[derive(Debug, Clone, PartialEq)]
pub struct IoTable {
    row_labels: Vec<String>,
    col_labels: Vec<String>,
    values: DMatrix<f64>,
}

/// Sorted unique labels after renaming, and the group of every source label
fn regroup<F>(labels: &[String], rename: F) -> (Vec<String>, Vec<usize>)
where
    F: Fn(&str) -> String,
{
    let renamed: Vec<String> = labels.iter().map(|l| rename(l)).collect();
    let mut unique = renamed.clone();
    unique.sort();
    unique.dedup();
    let groups = renamed
        .iter()
        .map(|l| unique.binary_search(l).unwrap_or_default())
        .collect();
    (unique, groups)
}

impl IoTable {
    pub fn new(row_labels: Vec<String>, col_labels: Vec<String>, values: DMatrix<f64>) -> Result<Self, NetworkError> {
        if values.nrows() != row_labels.len() {
            return Err(NetworkError::ShapeMismatch {
                what: "row labels",
                expected: values.nrows(),
                found: row_labels.len(),
            });
        }
        if values.ncols() != col_labels.len() {
            return Err(NetworkError::ShapeMismatch {
                what: "column labels",
                expected: values.ncols(),
                found: col_labels.len(),
            });
        }
        Ok(Self {
            row_labels,
            col_labels,
            values,
        })
    }

    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    pub fn col_labels(&self) -> &[String] {
        &self.col_labels
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Apply the label harmonisation and sum rows/columns that end up with
    /// the same label. Labels come out sorted; missing values count as 0.
    pub fn harmonise(&self, options: &IoTableOptions) -> IoTable {
        let (rows, row_group) = regroup(&self.row_labels, |l| options.rename(l));
        let (cols, col_group) = regroup(&self.col_labels, |l| options.rename(l));

        let mut values = DMatrix::zeros(rows.len(), cols.len());
        for (i, &gi) in row_group.iter().enumerate() {
            for (j, &gj) in col_group.iter().enumerate() {
                let v = self.values[(i, j)];
                if !v.is_nan() {
                    values[(gi, gj)] += v;
                }
            }
        }

        IoTable {
            row_labels: rows,
            col_labels: cols,
            values,
        }
    }

    fn col_position(&self, label: &str) -> Option<usize> {
        self.col_labels.iter().position(|c| c == label)
    }

    fn row_position(&self, label: &str) -> Option<usize> {
        self.row_labels.iter().position(|r| r == label)
    }
}

/// Which I/O matrix a graph is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMatrix {
    /// Transactions normalised by the buyer's output (input shares)
    A,
    /// Transactions normalised by the seller's output (output shares)
    B,
    /// Raw transactions
    Z,
}

impl fmt::Display for FlowMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowMatrix::A => f.write_str("A"),
            FlowMatrix::B => f.write_str("B"),
            FlowMatrix::Z => f.write_str("Z"),
        }
    }
}

/// Leontief side of the industry network
#[derive(Debug, Clone)]
pub struct UpstreamChain {
    pub a: DMatrix<f64>,
    /// `(I - A)⁻¹`
    pub leontief: DMatrix<f64>,
    /// `w / x`
    pub value_added_per_output: DVector<f64>,
    /// `diag(w / x) · L`
    pub value_adjusted_leontief: DMatrix<f64>,
}

/// Ghosh side of the industry network
#[derive(Debug, Clone)]
pub struct DownstreamChain {
    pub b: DMatrix<f64>,
    /// `(I - Bᵀ)⁻¹`
    pub ghosh_transposed: DMatrix<f64>,
    /// `f / x`
    pub consumption_per_output: DVector<f64>,
}

/// Interindustry block of an I/O table with its output, value added and
/// final demand vectors. Industries with zero output are dropped.
#[derive(Debug, Clone)]
pub struct IndustryNetwork {
    nodes: Vec<String>,
    x: DVector<f64>,
    w: DVector<f64>,
    f: DVector<f64>,
    z: DMatrix<f64>,
}

impl IndustryNetwork {
    pub fn from_table(table: &IoTable, options: &IoTableOptions) -> Result<Self, NetworkError> {
        let table = table.harmonise(options);

        let total_col = table
            .col_position("TOTAL")
            .ok_or_else(|| NetworkError::MissingColumn("TOTAL".to_string()))?;

        let industries: Vec<(usize, &String)> = table
            .row_labels
            .iter()
            .enumerate()
            .filter(|(_, l)| label_kind(l) == LabelKind::Industry)
            .collect();

        let mut industry_cols = Vec::with_capacity(industries.len());
        for (_, label) in &industries {
            let col = table
                .col_position(label)
                .ok_or_else(|| NetworkError::MissingColumn(label.to_string()))?;
            industry_cols.push(col);
        }

        let demand_cols: Vec<usize> = table
            .col_labels
            .iter()
            .enumerate()
            .filter(|(_, l)| label_kind(l) == LabelKind::FinalDemand)
            .map(|(j, _)| j)
            .collect();
        let tax_rows: Vec<usize> = table
            .row_labels
            .iter()
            .enumerate()
            .filter(|(_, l)| suffix(l) == "TAXSUB")
            .map(|(i, _)| i)
            .collect();
        let valu_row = table.row_position("VALU");
        if valu_row.is_none() {
            log::warn!("Input-output table has no VALU row; value added is taxes only");
        }

        let kept: Vec<usize> = industries
            .iter()
            .enumerate()
            .filter(|(_, (row, _))| table.values[(*row, total_col)] > 0.0)
            .map(|(k, _)| k)
            .collect();
        let dropped = industries.len() - kept.len();
        if dropped > 0 {
            log::info!("Dropping {} industries with zero output", dropped);
        }
        if kept.is_empty() {
            return Err(NetworkError::NoOutput);
        }

        let n = kept.len();
        let nodes = kept.iter().map(|&k| industries[k].1.clone()).collect();
        let x = DVector::from_fn(n, |i, _| table.values[(industries[kept[i]].0, total_col)]);
        let f = DVector::from_fn(n, |i, _| {
            let row = industries[kept[i]].0;
            demand_cols.iter().map(|&j| table.values[(row, j)]).sum::<f64>()
        });
        let w = DVector::from_fn(n, |j, _| {
            let col = industry_cols[kept[j]];
            let valu = valu_row.map_or(0.0, |r| table.values[(r, col)]);
            valu + tax_rows.iter().map(|&r| table.values[(r, col)]).sum::<f64>()
        });
        let z = DMatrix::from_fn(n, n, |i, j| table.values[(industries[kept[i]].0, industry_cols[kept[j]])]);

        Ok(Self { nodes, x, w, f, z })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Gross output `x`
    pub fn output(&self) -> &DVector<f64> {
        &self.x
    }

    /// Value added plus net taxes `w`
    pub fn value_added(&self) -> &DVector<f64> {
        &self.w
    }

    /// Final demand `f`
    pub fn final_demand(&self) -> &DVector<f64> {
        &self.f
    }

    /// Interindustry transactions `Z`
    pub fn transactions(&self) -> &DMatrix<f64> {
        &self.z
    }

    /// `A = Z / x`: column `j` divided by the output of `j`
    pub fn a(&self) -> DMatrix<f64> {
        let n = self.nodes.len();
        DMatrix::from_fn(n, n, |i, j| self.z[(i, j)] / self.x[j])
    }

    /// `B = Z / x[:, None]`: row `i` divided by the output of `i`
    pub fn b(&self) -> DMatrix<f64> {
        let n = self.nodes.len();
        DMatrix::from_fn(n, n, |i, j| self.z[(i, j)] / self.x[i])
    }

    pub fn matrix(&self, which: FlowMatrix) -> DMatrix<f64> {
        match which {
            FlowMatrix::A => self.a(),
            FlowMatrix::B => self.b(),
            FlowMatrix::Z => self.z.clone(),
        }
    }

    /// Directed graph of one I/O matrix. I/O tables list the supplier in
    /// the row, so the adjacency matrix is the transpose.
    pub fn graph(&self, which: FlowMatrix) -> FlowGraph {
        FlowGraph::from_adjacency(&self.nodes, &self.matrix(which).transpose())
    }

    pub fn upstream(&self) -> Result<UpstreamChain, NetworkError> {
        let n = self.nodes.len();
        let a = self.a();
        let leontief = (DMatrix::identity(n, n) - &a)
            .try_inverse()
            .ok_or(NetworkError::Singular("Leontief"))?;
        let value_added_per_output = self.w.component_div(&self.x);
        let value_adjusted_leontief = DMatrix::from_diagonal(&value_added_per_output) * &leontief;
        Ok(UpstreamChain {
            a,
            leontief,
            value_added_per_output,
            value_adjusted_leontief,
        })
    }

    pub fn downstream(&self) -> Result<DownstreamChain, NetworkError> {
        let n = self.nodes.len();
        let b = self.b();
        let ghosh_transposed = (DMatrix::identity(n, n) - b.transpose())
            .try_inverse()
            .ok_or(NetworkError::Singular("Ghosh"))?;
        let consumption_per_output = self.f.component_div(&self.x);
        Ok(DownstreamChain {
            b,
            ghosh_transposed,
            consumption_per_output,
        })
    }

    /// `(node, value)` pairs of a node vector, in node order
    pub fn labelled(&self, values: &DVector<f64>) -> Vec<(String, f64)> {
        self.nodes.iter().cloned().zip(values.iter().copied()).collect()
    }
}

/// Gross fixed capital formation per country: every `*_GFCF` column summed
/// over the industry, tax and value-added rows, keyed by the column's
/// country code.
pub fn gfcf_by_country(table: &IoTable, options: &IoTableOptions) -> BTreeMap<String, f64> {
    let harmonised = table.harmonise(&IoTableOptions {
        by_country: false,
        aggregation: options.aggregation.clone(),
    });

    let rows: Vec<usize> = harmonised
        .row_labels
        .iter()
        .enumerate()
        .filter(|(_, l)| !matches!(l.as_str(), "OUTPUT" | "TOTAL"))
        .map(|(i, _)| i)
        .collect();

    let mut totals = BTreeMap::new();
    for (j, label) in harmonised.col_labels.iter().enumerate() {
        if !label.contains("GFCF") {
            continue;
        }
        let sum: f64 = rows.iter().map(|&i| harmonised.values[(i, j)]).sum();
        *totals.entry(country_code(label)).or_insert(0.0) += sum;
    }
    totals
}
