//! Command-line front end: network build, feature refresh, panel assembly
//! and GMM estimation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::info;

use netpanel::config_loader::load_or_default;
use netpanel::gmm::{arellano_bond, ArellanoBondConfig, DynamicPanelData};
use netpanel::report::{generate_json_report, generate_text_report, text_report, EstimationReport};
use netpanel::{pipeline, tables};

#[derive(Parser)]
#[command(name = "netpanel")]
#[command(about = "Cross-country flow-network centralities and dynamic panel GMM")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every network for every year, then the panel
    Build {
        /// Directory holding the source tables
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving graphs, tables and the panel
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline configuration YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Recompute the centralities of one persisted graph
    Features {
        /// GML file to read
        #[arg(long)]
        graph: PathBuf,

        /// GML file to write (defaults to overwriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Favor tolerance
        #[arg(long, default_value = "0.0")]
        tol_favor: f64,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Re-assemble the panel from a previous build's outputs
    Panel {
        /// Output directory of a previous build
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Estimate a dynamic panel model on an assembled panel
    Estimate {
        /// Panel parquet file
        #[arg(long)]
        panel: PathBuf,

        /// Dependent variable column
        #[arg(long)]
        dependent: String,

        /// Comma-separated exogenous regressor columns
        #[arg(long, value_delimiter = ',')]
        regressors: Vec<String>,

        /// Lags of the dependent variable
        #[arg(long)]
        lags: Option<usize>,

        /// Maximum number of instrument depths
        #[arg(long)]
        iv_max_lags: Option<usize>,

        /// Add the level equations (System GMM); `--system false` turns
        /// them off when the config enables them
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        system: Option<bool>,

        /// Add a constant regressor
        #[arg(long, num_args = 0..=1, default_missing_value = "true")]
        intercept: Option<bool>,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the text report to this path
        #[arg(long)]
        text_report: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Build { input, output, config } => {
            let config = load_or_default(config.as_deref())?;
            let panel = pipeline::build(&input, &output, &config)?;
            info!(
                "Build complete: panel with {} rows written to {}",
                panel.len(),
                output.join(pipeline::PANEL_TABLE).display()
            );
        }

        Commands::Features {
            graph,
            output,
            tol_favor,
            config,
        } => {
            let config = load_or_default(config.as_deref())?;
            let target = output.unwrap_or_else(|| graph.clone());
            pipeline::refresh_graph_features(&graph, &target, &config.centrality, tol_favor)?;
        }

        Commands::Panel { output, config } => {
            let config = load_or_default(config.as_deref())?;
            let panel = pipeline::rebuild_panel(&output, &config)?;
            info!("Panel re-assembled with {} rows", panel.len());
        }

        Commands::Estimate {
            panel,
            dependent,
            regressors,
            lags,
            iv_max_lags,
            system,
            intercept,
            report,
            text_report: text_path,
            config,
        } => {
            let config = load_or_default(config.as_deref())?;
            let gmm = override_gmm(config.gmm.clone(), lags, iv_max_lags, system, intercept);

            let table = tables::read_panel(&panel)
                .with_context(|| format!("Failed to read panel {}", panel.display()))?;
            let data = DynamicPanelData::from_panel(&table, &dependent, &regressors)?;
            let result = arellano_bond(&data, &gmm)?;

            let estimation = EstimationReport::new(result, &panel, table.len());
            println!("{}", text_report(&estimation));
            if let Some(path) = report {
                generate_json_report(&estimation, &path)?;
            }
            if let Some(path) = text_path {
                generate_text_report(&estimation, &path)?;
            }
        }
    }

    Ok(())
}

/// Command-line values take precedence over the config file
fn override_gmm(
    mut gmm: ArellanoBondConfig,
    lags: Option<usize>,
    iv_max_lags: Option<usize>,
    system: Option<bool>,
    intercept: Option<bool>,
) -> ArellanoBondConfig {
    if let Some(lags) = lags {
        gmm.lags = lags;
    }
    if let Some(depth) = iv_max_lags {
        gmm.iv_max_lags = depth;
    }
    if let Some(system) = system {
        gmm.system = system;
    }
    if let Some(intercept) = intercept {
        gmm.add_intercept = intercept;
    }
    gmm
}
