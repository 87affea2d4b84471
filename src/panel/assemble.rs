//! Assembly of the per-year network features and macro series into the
//! estimation panel.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::transform::{add_changes, add_lag, PowerTransform};
use super::{Panel, PanelError, PanelKey};
use crate::centrality::{FeatureTable, Metric};
use crate::network::NetworkKind;

/// Everything computed for one year
#[derive(Debug, Clone, Default)]
pub struct YearFeatures {
    pub year: i64,
    pub networks: BTreeMap<NetworkKind, FeatureTable>,
    /// Gross output per country
    pub output: BTreeMap<String, f64>,
    /// Value added per country
    pub gdp: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroObservation {
    pub country: String,
    pub year: i64,
    pub value: f64,
}

impl MacroObservation {
    pub fn new(country: impl Into<String>, year: i64, value: f64) -> Self {
        Self {
            country: country.into(),
            year,
            value,
        }
    }
}

/// Country-year series joined onto the network panel
#[derive(Debug, Clone, Default)]
pub struct MacroSeries {
    pub gfcf: Vec<MacroObservation>,
    /// Persons
    pub population: Vec<MacroObservation>,
    /// Working-age persons
    pub working_population: Vec<MacroObservation>,
    pub gini: Vec<MacroObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelOptions {
    /// Networks whose features become panel columns
    pub networks: Vec<NetworkKind>,
    /// Yeo-Johnson + standardisation of the centrality levels
    pub power_transform: bool,
    pub start_year: i64,
    pub end_year: i64,
    /// Drop rows without a population figure
    pub require_population: bool,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            networks: vec![NetworkKind::Financial, NetworkKind::Goods, NetworkKind::Human],
            power_transform: true,
            start_year: 2005,
            end_year: 2015,
            require_population: true,
        }
    }
}

/// Panel column names of every centrality of the given networks
pub fn centrality_columns(networks: &[NetworkKind]) -> Vec<String> {
    networks
        .iter()
        .flat_map(|kind| Metric::ALL.into_iter().map(move |m| format!("{}_{}", kind.prefix(), m.key())))
        .collect()
}

/// Build a single-column panel, keeping the last value of duplicated keys
fn macro_panel(observations: &[MacroObservation], column: &str) -> Result<Panel, PanelError> {
    let mut cells: BTreeMap<PanelKey, f64> = BTreeMap::new();
    for obs in observations {
        if cells.insert(PanelKey::new(obs.country.as_str(), obs.year), obs.value).is_some() {
            log::warn!("Duplicate {} observation for {} in {}", column, obs.country, obs.year);
        }
    }
    let values = cells.values().copied().collect();
    let mut panel = Panel::new(cells.into_keys().collect())?;
    panel.insert_column(column, values)?;
    Ok(panel)
}

fn insert_log(panel: &mut Panel, source: &str, target: &str) -> Result<(), PanelError> {
    let values = panel.require(source)?.iter().map(|v| v.ln_1p()).collect();
    panel.insert_column(target, values)
}

fn network_panel(years: &[YearFeatures], options: &PanelOptions) -> Result<Panel, PanelError> {
    let mut keys = Vec::new();
    let mut output = Vec::new();
    let mut gdp = Vec::new();
    let feature_columns = centrality_columns(&options.networks);
    let mut features: Vec<Vec<f64>> = vec![Vec::new(); feature_columns.len()];

    for year in years {
        let without_gdp = year.output.keys().filter(|c| !year.gdp.contains_key(*c)).count();
        if without_gdp > 0 {
            log::warn!("{}: {} countries have output but no GDP", year.year, without_gdp);
        }

        for (country, &out) in &year.output {
            let Some(&value_added) = year.gdp.get(country) else {
                continue;
            };
            keys.push(PanelKey::new(country.as_str(), year.year));
            output.push(out);
            gdp.push(value_added);

            let mut column = 0;
            for kind in &options.networks {
                let record = year.networks.get(kind).and_then(|t| t.get(country));
                for metric in Metric::ALL {
                    features[column].push(record.map_or(f64::NAN, |r| r.get(metric)));
                    column += 1;
                }
            }
        }
    }

    let mut panel = Panel::new(keys)?;
    panel.insert_column("output", output)?;
    panel.insert_column("gdp", gdp)?;
    for (name, values) in feature_columns.into_iter().zip(features) {
        panel.insert_column(name, values)?;
    }
    Ok(panel)
}

fn gfcf_panel(macros: &MacroSeries) -> Result<Panel, PanelError> {
    let mut panel = macro_panel(&macros.gfcf, "GFCF")?;
    insert_log(&mut panel, "GFCF", "log_GFCF")?;
    add_changes(&mut panel, "log_GFCF")?;
    Ok(panel)
}

fn population_panel(macros: &MacroSeries) -> Result<Panel, PanelError> {
    let mut panel = macro_panel(&macros.population, "population")?;
    panel.left_join(&macro_panel(&macros.working_population, "wkn_population")?);
    for column in ["population", "wkn_population"] {
        let log_column = format!("log_{column}");
        insert_log(&mut panel, column, &log_column)?;
        add_changes(&mut panel, &log_column)?;
    }
    Ok(panel)
}

/// Output per unit of a Cobb-Douglas input bundle of labour and capital
fn insert_productivity(panel: &mut Panel) -> Result<(), PanelError> {
    let gdp = panel.require("gdp")?;
    let labour = panel.require("wkn_population")?;
    let capital = panel.require("GFCF")?;
    let values = gdp
        .iter()
        .zip(labour)
        .zip(capital)
        .map(|((g, l), k)| g * 1.0e6 / (l.powf(0.3) * k.powf(0.7)))
        .collect();
    panel.insert_column("productivity", values)
}

/// Join network features, output/GDP and the macro series into one panel.
///
/// Centrality levels are power transformed first (when enabled) so that
/// every derived lag and delta is consistent with the exposed levels.
pub fn assemble_panel(years: &[YearFeatures], macros: &MacroSeries, options: &PanelOptions) -> Result<Panel, PanelError> {
    let mut panel = network_panel(years, options)?;
    insert_log(&mut panel, "output", "log_output")?;
    insert_log(&mut panel, "gdp", "log_gdp")?;
    panel.sort();

    let centralities = centrality_columns(&options.networks);
    if options.power_transform {
        let transform = PowerTransform::fit(&panel, &centralities)?;
        transform.transform(&mut panel)?;
    }

    for column in centralities.iter().map(String::as_str).chain(["log_output", "log_gdp"]) {
        add_changes(&mut panel, column)?;
    }
    add_lag(&mut panel, "log_output", 2, "lag2_log_output")?;
    add_lag(&mut panel, "log_gdp", 2, "lag2_log_gdp")?;

    panel.left_join(&gfcf_panel(macros)?);
    panel.left_join(&population_panel(macros)?);
    panel.left_join(&macro_panel(&macros.gini, "gini")?);
    insert_productivity(&mut panel)?;

    let network_countries: BTreeSet<String> = panel.countries().into_iter().map(str::to_string).collect();
    if options.require_population {
        let dropped = panel.drop_missing(&["population"])?;
        if dropped > 0 {
            log::info!("Dropped {} rows without population", dropped);
        }
    }

    let constant = vec![1.0; panel.len()];
    panel.insert_column("constant", constant)?;
    panel.retain_rows(|_, key| (options.start_year..=options.end_year).contains(&key.year));

    let kept = panel.countries();
    let lost: Vec<&str> = network_countries
        .iter()
        .map(String::as_str)
        .filter(|c| !kept.contains(c))
        .collect();
    if !lost.is_empty() {
        log::warn!("Countries lost in assembly: {}", lost.join(", "));
    }

    log::info!(
        "Assembled panel with {} rows, {} countries and {} columns",
        panel.len(),
        kept.len(),
        panel.column_names().count()
    );
    Ok(panel)
}
