//! Batch pipeline: networks and features per year, persistence, and panel
//! assembly.
//!
//! Output layout:
//!
//! ```text
//! <output>/<year>/{A_country,B_country,...}.gml   graphs with node features
//! <output>/<year>/{output,gdp,gfcf}.parquet       per-country tables
//! <output>/<year>/{value_added,consumption}_per_output.parquet
//! <output>/macro.parquet                          joined macro series
//! <output>/panel.parquet                          assembled panel
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use regex::Regex;

use crate::centrality::{compute_features, CentralityConfig, FeatureTable, GraphSummary};
use crate::config::Config;
use crate::graph::gml::{parse_gml_file, write_gml_file, GmlDocument};
use crate::graph::FlowGraph;
use crate::network::migration::working_population_index;
use crate::network::{
    estimated_migration, gfcf_by_country, FlowMatrix, IndustryNetwork, MigrationNetworkBuilder, NetworkKind,
};
use crate::panel::{assemble_panel, MacroObservation, MacroSeries, Panel, PanelKey, YearFeatures};
use crate::sources::{self, resolve};
use crate::tables::{read_node_table, read_panel, write_node_table, write_panel};

pub const OUTPUT_TABLE: &str = "output.parquet";
pub const GDP_TABLE: &str = "gdp.parquet";
pub const GFCF_TABLE: &str = "gfcf.parquet";
pub const MACRO_TABLE: &str = "macro.parquet";
pub const PANEL_TABLE: &str = "panel.parquet";

pub fn year_dir(output: &Path, year: i64) -> PathBuf {
    output.join(year.to_string())
}

pub fn graph_path(output: &Path, year: i64, kind: NetworkKind) -> PathBuf {
    year_dir(output, year).join(format!("{}.gml", kind.file_stem()))
}

/// Country-year source tables shared by every year
#[derive(Debug, Clone, Default)]
pub struct MacroSources {
    pub population: Vec<MacroObservation>,
    /// Percent of the population
    pub working_share: Vec<MacroObservation>,
    pub gini: Vec<MacroObservation>,
}

impl MacroSources {
    pub fn load(input: &Path, config: &Config) -> Result<Self> {
        // Country-year tables carry no year placeholder; any year resolves them
        let path = |template: &str| resolve(input, template, config.years.start);
        Ok(Self {
            population: sources::read_population(&path(&config.sources.population))?,
            working_share: sources::read_working_share(&path(&config.sources.working_share))?,
            gini: sources::read_gini(&path(&config.sources.gini))?,
        })
    }
}

/// What one year of the build produces for the panel
#[derive(Debug, Clone)]
pub struct YearArtifacts {
    pub features: YearFeatures,
    pub gfcf: BTreeMap<String, f64>,
}

/// Compute the features of `graph` and persist it as GML with the
/// features as node attributes and the summary as graph attributes
fn compute_and_write(
    path: &Path,
    year: i64,
    kind: NetworkKind,
    graph: &FlowGraph,
    config: &Config,
) -> Result<FeatureTable> {
    let features = compute_features(graph, &config.centrality, config.networks.tol_favor(kind))
        .wrap_err_with(|| format!("{year}: failed to compute {kind} features"))?;
    let summary = GraphSummary::compute(graph).wrap_err_with(|| format!("{year}: failed to summarise {kind}"))?;

    let mut doc = GmlDocument::new(graph.clone());
    doc.node_attributes = features.to_node_attributes();
    doc.graph_attributes.insert("year".to_string(), year.to_string());
    doc.graph_attributes.insert("network".to_string(), kind.prefix().to_string());
    for (key, value) in summary.attributes() {
        doc.graph_attributes.insert(key.to_string(), value);
    }
    write_gml_file(path, &doc)?;

    info!(
        "{}: {} network with {} nodes, {} edges, efficiency {:.4}",
        year,
        kind,
        summary.nodes,
        summary.edges,
        summary.global_efficiency
    );
    Ok(features)
}

fn network_graph(
    kind: NetworkKind,
    input: &Path,
    year: i64,
    config: &Config,
    macros: &MacroSources,
    industry: &IndustryNetwork,
) -> Result<FlowGraph> {
    match (kind, kind.flow_matrix()) {
        (_, Some(matrix)) => Ok(industry.graph(matrix)),
        (NetworkKind::Human, None) => {
            let flows = sources::read_migration_flows(&resolve(input, &config.sources.migration, year), year)?;
            let records = sources::population_records(&macros.population, &macros.working_share, year);
            let builder = MigrationNetworkBuilder::new().with_reference_nodes(industry.nodes().iter().cloned());
            Ok(builder.build(&flows, &working_population_index(&records)))
        }
        (_, None) => {
            let rates = sources::read_emigration_rates(&resolve(input, &config.sources.emigration_rates, year))?;
            Ok(estimated_migration(
                &industry.graph(FlowMatrix::B),
                &rates,
                &config.networks.estimated,
            ))
        }
    }
}

/// Leontief and Ghosh per-output vectors; a singular system is reported and
/// skipped
fn write_chains(dir: &Path, year: i64, industry: &IndustryNetwork) -> Result<()> {
    match industry.upstream() {
        Ok(chain) => write_node_table(
            &dir.join("value_added_per_output.parquet"),
            "value_added_per_output",
            &industry.labelled(&chain.value_added_per_output),
        )?,
        Err(e) => warn!("{}: upstream chain skipped: {}", year, e),
    }
    match industry.downstream() {
        Ok(chain) => write_node_table(
            &dir.join("consumption_per_output.parquet"),
            "consumption_per_output",
            &industry.labelled(&chain.consumption_per_output),
        )?,
        Err(e) => warn!("{}: downstream chain skipped: {}", year, e),
    }
    Ok(())
}

/// Build, featurise and persist every enabled network of one year
pub fn process_year(input: &Path, output: &Path, year: i64, config: &Config, macros: &MacroSources) -> Result<YearArtifacts> {
    info!("Processing year {}", year);
    let dir = year_dir(output, year);
    fs::create_dir_all(&dir).wrap_err_with(|| format!("Failed to create {}", dir.display()))?;

    let table = sources::read_io_table(&resolve(input, &config.sources.io_table, year))?;
    let options = &config.networks.io_table;
    let industry =
        IndustryNetwork::from_table(&table, options).wrap_err_with(|| format!("{year}: invalid input-output table"))?;

    let output_rows = industry.labelled(industry.output());
    let gdp_rows = industry.labelled(industry.value_added());
    write_node_table(&dir.join(OUTPUT_TABLE), "output", &output_rows)?;
    write_node_table(&dir.join(GDP_TABLE), "gdp", &gdp_rows)?;
    write_chains(&dir, year, &industry)?;

    let gfcf = gfcf_by_country(&table, options);
    let gfcf_rows: Vec<(String, f64)> = gfcf.iter().map(|(c, v)| (c.clone(), *v)).collect();
    write_node_table(&dir.join(GFCF_TABLE), "GFCF", &gfcf_rows)?;

    let mut networks = BTreeMap::new();
    for &kind in &config.networks.enabled {
        let graph = network_graph(kind, input, year, config, macros, &industry)?;
        let features = compute_and_write(&graph_path(output, year, kind), year, kind, &graph, config)?;
        networks.insert(kind, features);
    }

    Ok(YearArtifacts {
        features: YearFeatures {
            year,
            networks,
            output: output_rows.into_iter().collect(),
            gdp: gdp_rows.into_iter().collect(),
        },
        gfcf,
    })
}

/// Macro series of the panel as one table keyed by (country, year)
pub fn macro_table(macros: &MacroSeries) -> Result<Panel> {
    let series = [
        ("GFCF", &macros.gfcf),
        ("population", &macros.population),
        ("wkn_population", &macros.working_population),
        ("gini", &macros.gini),
    ];

    let mut cells: BTreeMap<PanelKey, [f64; 4]> = BTreeMap::new();
    for (column, (_, observations)) in series.iter().enumerate() {
        for obs in observations.iter() {
            let row = cells
                .entry(PanelKey::new(obs.country.as_str(), obs.year))
                .or_insert([f64::NAN; 4]);
            row[column] = obs.value;
        }
    }

    let rows: Vec<[f64; 4]> = cells.values().copied().collect();
    let mut panel = Panel::new(cells.into_keys().collect())?;
    for (column, (name, _)) in series.iter().enumerate() {
        panel.insert_column(*name, rows.iter().map(|r| r[column]).collect())?;
    }
    Ok(panel)
}

/// Inverse of [`macro_table`]; missing cells are skipped
pub fn macro_series(panel: &Panel) -> Result<MacroSeries> {
    let observations = |column: &str| -> Result<Vec<MacroObservation>> {
        let values = panel.require(column)?;
        Ok(panel
            .keys()
            .iter()
            .zip(values)
            .filter(|(_, v)| !v.is_nan())
            .map(|(k, &v)| MacroObservation::new(k.country.as_str(), k.year, v))
            .collect())
    };
    Ok(MacroSeries {
        gfcf: observations("GFCF")?,
        population: observations("population")?,
        working_population: observations("wkn_population")?,
        gini: observations("gini")?,
    })
}

/// Full build: every year in parallel, then the panel
pub fn build(input: &Path, output: &Path, config: &Config) -> Result<Panel> {
    fs::create_dir_all(output).wrap_err_with(|| format!("Failed to create {}", output.display()))?;
    let macro_sources = MacroSources::load(input, config)?;

    let years = config.years.years();
    info!("Building networks for {} years from {}", years.len(), input.display());
    let mut artifacts = years
        .par_iter()
        .map(|&year| process_year(input, output, year, config, &macro_sources))
        .collect::<Result<Vec<_>>>()?;
    artifacts.sort_by_key(|a| a.features.year);

    let gfcf = artifacts
        .iter()
        .flat_map(|a| {
            a.gfcf
                .iter()
                .map(move |(country, &value)| MacroObservation::new(country.as_str(), a.features.year, value))
        })
        .collect();
    let macros = MacroSeries {
        gfcf,
        working_population: sources::working_population_series(&macro_sources.population, &macro_sources.working_share),
        population: macro_sources.population,
        gini: macro_sources.gini,
    };
    write_panel(&output.join(MACRO_TABLE), &macro_table(&macros)?)?;

    let features: Vec<YearFeatures> = artifacts.into_iter().map(|a| a.features).collect();
    let panel = assemble_panel(&features, &macros, &config.panel)?;
    write_panel(&output.join(PANEL_TABLE), &panel)?;
    Ok(panel)
}

/// Year directories present in `output`, sorted
pub fn discover_years(output: &Path) -> Result<Vec<i64>> {
    let pattern = Regex::new(r"^\d{4}$")?;
    let mut years = Vec::new();
    for entry in fs::read_dir(output).wrap_err_with(|| format!("Failed to list {}", output.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if pattern.is_match(name) && entry.path().join(OUTPUT_TABLE).is_file() {
            years.push(name.parse()?);
        }
    }
    years.sort_unstable();
    Ok(years)
}

/// Read back the persisted features of one year
pub fn load_year(output: &Path, year: i64, networks: &[NetworkKind]) -> Result<YearFeatures> {
    let dir = year_dir(output, year);
    let mut features = YearFeatures {
        year,
        output: read_node_table(&dir.join(OUTPUT_TABLE), "output")?,
        gdp: read_node_table(&dir.join(GDP_TABLE), "gdp")?,
        ..YearFeatures::default()
    };

    for &kind in networks {
        let path = graph_path(output, year, kind);
        if !path.is_file() {
            warn!("{}: no {} graph at {}", year, kind, path.display());
            continue;
        }
        let doc = parse_gml_file(&path)?;
        features.networks.insert(kind, FeatureTable::from_document(&doc));
    }
    debug!("{}: loaded {} networks", year, features.networks.len());
    Ok(features)
}

/// Assemble the panel again from a previous build's outputs
pub fn rebuild_panel(output: &Path, config: &Config) -> Result<Panel> {
    let years: Vec<i64> = discover_years(output)?
        .into_iter()
        .filter(|&y| config.years.contains(y))
        .collect();
    info!("Re-assembling panel from {} persisted years", years.len());

    let features = years
        .par_iter()
        .map(|&year| load_year(output, year, &config.panel.networks))
        .collect::<Result<Vec<_>>>()?;
    let macros = macro_series(&read_panel(&output.join(MACRO_TABLE))?)?;

    let panel = assemble_panel(&features, &macros, &config.panel)?;
    write_panel(&output.join(PANEL_TABLE), &panel)?;
    Ok(panel)
}

/// Recompute the features of a persisted graph. Attributes that are not
/// centralities are kept.
pub fn refresh_graph_features(
    input: &Path,
    output: &Path,
    centrality: &CentralityConfig,
    tol_favor: f64,
) -> Result<FeatureTable> {
    let mut doc = parse_gml_file(input)?;
    let features = compute_features(&doc.graph, centrality, tol_favor)
        .wrap_err_with(|| format!("Failed to compute features of {}", input.display()))?;
    let summary = GraphSummary::compute(&doc.graph)?;

    for (node, attrs) in features.to_node_attributes() {
        doc.node_attributes.entry(node).or_default().extend(attrs);
    }
    for (key, value) in summary.attributes() {
        doc.graph_attributes.insert(key.to_string(), value);
    }
    write_gml_file(output, &doc)?;
    info!("Wrote features of {} nodes to {}", features.len(), output.display());
    Ok(features)
}
