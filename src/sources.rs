//! Readers for the delimited source tables.
//!
//! File names come from [`SourcePaths`] and may contain a `{year}`
//! placeholder. Every reader propagates I/O and parse failures; rows that
//! simply carry no value (empty cells) are skipped.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Context, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::network::{IoTable, MigrationFlow, PopulationRecord};
use crate::panel::MacroObservation;

/// OECD variable holding bilateral inflows in the migration database
pub const INFLOW_VARIABLE: &str = "Inflows of foreign population by nationality";

/// Source file names, relative to the input directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePaths {
    /// Inter-country input-output table of one year
    pub io_table: String,
    /// International migration database extract
    pub migration: String,
    /// Population in millions (MEASURE `MLN_PER`, SUBJECT `TOT`)
    pub population: String,
    /// Working-age share of the population, in percent
    pub working_share: String,
    pub gini: String,
    /// National emigration rates of one year (`country`, `rate`)
    pub emigration_rates: String,
}

impl Default for SourcePaths {
    fn default() -> Self {
        Self {
            io_table: "ICIO2018_{year}.csv".to_string(),
            migration: "MIG.csv".to_string(),
            population: "population.csv".to_string(),
            working_share: "working_population.csv".to_string(),
            gini: "gini.csv".to_string(),
            emigration_rates: "emigration_rates_{year}.csv".to_string(),
        }
    }
}

impl SourcePaths {
    pub fn templates(&self) -> [(&'static str, &str); 6] {
        [
            ("io_table", self.io_table.as_str()),
            ("migration", self.migration.as_str()),
            ("population", self.population.as_str()),
            ("working_share", self.working_share.as_str()),
            ("gini", self.gini.as_str()),
            ("emigration_rates", self.emigration_rates.as_str()),
        ]
    }
}

/// Substitute `{year}` in a file name template and join it onto `dir`
pub fn resolve(dir: &Path, template: &str, year: i64) -> PathBuf {
    dir.join(template.replace("{year}", &year.to_string()))
}

fn parse_cell(cell: &str) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(0.0);
    }
    cell.parse::<f64>().map_err(|e| eyre!("invalid number {:?}: {}", cell, e))
}

/// Read an input-output table: the first column holds row labels and the
/// header holds column labels. Empty cells are zero.
pub fn read_io_table(path: &Path) -> Result<IoTable> {
    log::info!("Reading input-output table {}", path.display());
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open input-output table {}", path.display()))?;

    let col_labels: Vec<String> = reader.headers()?.iter().skip(1).map(str::to_string).collect();
    let mut row_labels = Vec::new();
    let mut values = Vec::new();

    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed record {} in {}", line + 2, path.display()))?;
        let mut fields = record.iter();
        let label = fields.next().unwrap_or_default();
        row_labels.push(label.to_string());
        for cell in fields {
            values.push(parse_cell(cell).with_context(|| format!("Row {} of {}", label, path.display()))?);
        }
    }

    let matrix = if values.len() == row_labels.len() * col_labels.len() {
        DMatrix::from_row_slice(row_labels.len(), col_labels.len(), &values)
    } else {
        return Err(eyre!(
            "{}: {} cells for {} rows and {} columns",
            path.display(),
            values.len(),
            row_labels.len(),
            col_labels.len()
        ));
    };
    Ok(IoTable::new(row_labels, col_labels, matrix)?)
}

#[derive(Debug, Deserialize)]
struct MigrationRow {
    #[serde(rename = "CO2")]
    origin: String,
    #[serde(rename = "COU")]
    destination: String,
    #[serde(rename = "Variable")]
    variable: String,
    #[serde(rename = "Year")]
    year: i64,
    #[serde(rename = "Value")]
    value: Option<f64>,
}

/// Bilateral inflows of one year
pub fn read_migration_flows(path: &Path, year: i64) -> Result<Vec<MigrationFlow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open migration table {}", path.display()))?;

    let mut flows = Vec::new();
    for row in reader.deserialize() {
        let row: MigrationRow = row.with_context(|| format!("Malformed migration record in {}", path.display()))?;
        if row.year != year || row.variable != INFLOW_VARIABLE {
            continue;
        }
        if let Some(weight) = row.value {
            flows.push(MigrationFlow {
                country_from: row.origin,
                country_to: row.destination,
                weight,
            });
        }
    }
    log::debug!("{} migration flows for {}", flows.len(), year);
    Ok(flows)
}

/// Row of an OECD indicator extract
#[derive(Debug, Deserialize)]
struct IndicatorRow {
    #[serde(rename = "LOCATION")]
    location: String,
    #[serde(rename = "SUBJECT", default)]
    subject: String,
    #[serde(rename = "MEASURE", default)]
    measure: String,
    #[serde(rename = "TIME")]
    time: i64,
    #[serde(rename = "Value")]
    value: Option<f64>,
}

fn read_indicator<F>(path: &Path, mut keep: F, scale: f64) -> Result<Vec<MacroObservation>>
where
    F: FnMut(&IndicatorRow) -> bool,
{
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open indicator table {}", path.display()))?;

    let mut observations = Vec::new();
    for row in reader.deserialize() {
        let row: IndicatorRow = row.with_context(|| format!("Malformed indicator record in {}", path.display()))?;
        if !keep(&row) {
            continue;
        }
        if let Some(value) = row.value {
            observations.push(MacroObservation::new(row.location, row.time, value * scale));
        }
    }
    Ok(observations)
}

/// Total population in persons
pub fn read_population(path: &Path) -> Result<Vec<MacroObservation>> {
    read_indicator(path, |row| row.measure == "MLN_PER" && row.subject == "TOT", 1.0e6)
}

/// Working-age share of the population, in percent
pub fn read_working_share(path: &Path) -> Result<Vec<MacroObservation>> {
    read_indicator(path, |_| true, 1.0)
}

pub fn read_gini(path: &Path) -> Result<Vec<MacroObservation>> {
    read_indicator(path, |row| row.subject == "GINI", 1.0)
}

#[derive(Debug, Deserialize)]
struct EmigrationRow {
    country: String,
    rate: Option<f64>,
}

pub fn read_emigration_rates(path: &Path) -> Result<HashMap<String, f64>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open emigration rates {}", path.display()))?;

    let mut rates = HashMap::new();
    for row in reader.deserialize() {
        let row: EmigrationRow = row.with_context(|| format!("Malformed emigration record in {}", path.display()))?;
        if let Some(rate) = row.rate {
            rates.insert(row.country, rate);
        }
    }
    Ok(rates)
}

/// Population records of one year, with the working share when known
pub fn population_records(
    population: &[MacroObservation],
    working_share: &[MacroObservation],
    year: i64,
) -> Vec<PopulationRecord> {
    let shares: HashMap<&str, f64> = working_share
        .iter()
        .filter(|o| o.year == year)
        .map(|o| (o.country.as_str(), o.value))
        .collect();

    population
        .iter()
        .filter(|o| o.year == year)
        .map(|o| PopulationRecord {
            country: o.country.clone(),
            population: o.value,
            working_share: shares.get(o.country.as_str()).copied(),
        })
        .collect()
}

/// Working-age head count per (country, year) where both inputs exist
pub fn working_population_series(
    population: &[MacroObservation],
    working_share: &[MacroObservation],
) -> Vec<MacroObservation> {
    let shares: BTreeMap<(&str, i64), f64> = working_share
        .iter()
        .map(|o| ((o.country.as_str(), o.year), o.value))
        .collect();

    population
        .iter()
        .filter_map(|o| {
            shares
                .get(&(o.country.as_str(), o.year))
                .map(|pct| MacroObservation::new(o.country.as_str(), o.year, o.value * pct / 100.0))
        })
        .collect()
}
