use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use tempfile::TempDir;

use netpanel::centrality::{compute_features, CentralityConfig, Metric};
use netpanel::config::Config;
use netpanel::graph::gml::parse_gml_file;
use netpanel::network::{FlowMatrix, IndustryNetwork, IoTableOptions, NetworkKind};
use netpanel::pipeline;
use netpanel::sources::read_io_table;
use netpanel::tables::{read_node_table, read_panel};

/// Three countries with one industry each. `usa_scale` varies the USA row
/// between years.
fn io_csv(usa_scale: f64) -> String {
    let usa = |v: f64| v * usa_scale;
    format!(
        ",AUS_A,FRA_A,USA_A,AUS_HFCE,FRA_GFCF,TOTAL\n\
         AUS_A,10,20,0,60,10,100\n\
         FRA_A,5,0,15,20,10,50\n\
         USA_A,0,{},{},{},10,{}\n\
         AUS_TAXSUB,1,1,2,0,0,0\n\
         VALU,40,10,100,0,0,0\n\
         OUTPUT,100,50,200,0,0,0\n",
        usa(10.0),
        usa(30.0),
        usa(150.0) + 10.0 * (usa_scale - 1.0),
        usa(200.0)
    )
}

fn write_sources(dir: &Path) {
    fs::write(dir.join("ICIO2018_2010.csv"), io_csv(1.0)).unwrap();
    fs::write(dir.join("ICIO2018_2011.csv"), io_csv(1.1)).unwrap();

    let mut migration = String::from("CO2,COU,Variable,Year,Value\n");
    for year in [2010, 2011] {
        for (from, to, value) in [("FRA", "AUS", 1000.0), ("USA", "AUS", 500.0), ("AUS", "USA", 200.0), ("ITA", "FRA", 300.0)] {
            migration.push_str(&format!(
                "{from},{to},Inflows of foreign population by nationality,{year},{value}\n"
            ));
        }
    }
    fs::write(dir.join("MIG.csv"), migration).unwrap();

    let mut population = String::from("LOCATION,SUBJECT,MEASURE,TIME,Value\n");
    let mut working = String::from("LOCATION,SUBJECT,MEASURE,TIME,Value\n");
    for year in [2010, 2011] {
        for (country, millions) in [("AUS", 22.0), ("FRA", 65.0), ("USA", 310.0), ("ITA", 60.0)] {
            population.push_str(&format!("{country},TOT,MLN_PER,{year},{millions}\n"));
            working.push_str(&format!("{country},TOT,PC_POP,{year},65\n"));
        }
    }
    fs::write(dir.join("population.csv"), population).unwrap();
    fs::write(dir.join("working_population.csv"), working).unwrap();
    fs::write(
        dir.join("gini.csv"),
        "LOCATION,SUBJECT,MEASURE,TIME,Value\nFRA,GINI,INEQ,2010,0.29\n",
    )
    .unwrap();
}

fn test_config() -> Config {
    let mut config: Config = serde_yaml::from_str("years: {start: 2010, end: 2011}").unwrap();
    config.panel.power_transform = false;
    config.validate().unwrap();
    config
}

#[test]
fn test_io_table_to_hhi() {
    let dir = TempDir::new().unwrap();
    write_sources(dir.path());

    let table = read_io_table(&dir.path().join("ICIO2018_2010.csv")).unwrap();
    let industry = IndustryNetwork::from_table(&table, &IoTableOptions::default()).unwrap();
    assert_eq!(industry.nodes(), &["AUS".to_string(), "FRA".to_string(), "USA".to_string()][..]);

    // B = Z / x row-wise
    let b = industry.b();
    assert_relative_eq!(b[(0, 1)], 0.2, epsilon = 1e-12);
    assert_relative_eq!(b[(1, 2)], 0.3, epsilon = 1e-12);
    assert_relative_eq!(b[(2, 1)], 0.05, epsilon = 1e-12);
    // A = Z / x column-wise
    let a = industry.a();
    assert_relative_eq!(a[(0, 1)], 20.0 / 50.0, epsilon = 1e-12);
    assert_relative_eq!(a[(2, 2)], 30.0 / 200.0, epsilon = 1e-12);

    // The goods graph is Bᵀ: FRA sends 0.2 to AUS and 0.05 to USA
    let goods = industry.graph(FlowMatrix::B);
    let features = compute_features(&goods, &CentralityConfig::default(), 1.0e-3).unwrap();
    let hhi = |node: &str| features.get(node).unwrap().get(Metric::HhiIndex);

    let fra = 0.8_f64.powi(2) + 0.2_f64.powi(2);
    assert_relative_eq!(hhi("FRA"), fra, epsilon = 1e-9);
    assert_relative_eq!(hhi("AUS"), 1.0, epsilon = 1e-9);
    assert_relative_eq!(hhi("USA"), 1.0, epsilon = 1e-9);
}

#[test]
fn test_build_and_rebuild_panel() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_sources(input.path());
    let config = test_config();

    let panel = pipeline::build(input.path(), output.path(), &config).unwrap();
    assert_eq!(panel.len(), 6);
    assert_eq!(panel.countries().into_iter().collect::<Vec<_>>(), vec!["AUS", "FRA", "USA"]);

    // Per-year artifacts
    for year in [2010, 2011] {
        let dir = output.path().join(year.to_string());
        for kind in [NetworkKind::Financial, NetworkKind::Goods, NetworkKind::Human] {
            assert!(pipeline::graph_path(output.path(), year, kind).is_file());
        }
        let gdp = read_node_table(&dir.join(pipeline::GDP_TABLE), "gdp").unwrap();
        assert_eq!(gdp["FRA"], 11.0);
        assert!(dir.join("value_added_per_output.parquet").is_file());
    }

    // Node attributes of the persisted goods graph
    let doc = parse_gml_file(&pipeline::graph_path(output.path(), 2010, NetworkKind::Goods)).unwrap();
    let fra = doc.node_attributes("FRA").unwrap();
    assert_relative_eq!(fra["hhi_index"], 0.68, epsilon = 1e-9);
    assert_eq!(doc.graph_attributes["network"], "goods");

    // Migration rates are per working-age inhabitant of the origin; ITA is
    // outside the reference countries and becomes ROW
    let human = parse_gml_file(&pipeline::graph_path(output.path(), 2010, NetworkKind::Human)).unwrap();
    assert_relative_eq!(
        human.graph.edge_weight("FRA", "AUS").unwrap(),
        1000.0 / (65.0e6 * 0.65),
        epsilon = 1e-15
    );
    assert!(human.graph.contains_node("ROW"));

    // Panel columns
    let row = panel
        .keys()
        .iter()
        .position(|k| k.country == "FRA" && k.year == 2011)
        .unwrap();
    assert_relative_eq!(panel.value("goods_hhi_index", row - 1).unwrap(), 0.68, epsilon = 1e-9);
    assert_relative_eq!(panel.value("log_gdp", row).unwrap(), 12.0_f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(panel.value("lag_log_gdp", row).unwrap(), 12.0_f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(panel.value("GFCF", row).unwrap(), 30.0, epsilon = 1e-12);
    assert_eq!(panel.value("constant", row), Some(1.0));
    assert!(panel.value("lag_log_gdp", row - 1).unwrap().is_nan());
    assert!(panel.value("gini", row).unwrap().is_nan());

    // The persisted panel matches, and rebuilding from outputs reproduces it
    let persisted = read_panel(&output.path().join(pipeline::PANEL_TABLE)).unwrap();
    assert_eq!(persisted.keys(), panel.keys());

    let rebuilt = pipeline::rebuild_panel(output.path(), &config).unwrap();
    assert_eq!(rebuilt.keys(), panel.keys());
    for name in ["goods_hhi_index", "human_pagerank", "log_output", "productivity"] {
        let original = panel.column(name).unwrap();
        let again = rebuilt.column(name).unwrap();
        for (a, b) in original.iter().zip(again) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12, "{name}: {a} vs {b}");
        }
    }
}

#[test]
fn test_missing_source_is_fatal() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_sources(input.path());
    fs::remove_file(input.path().join("ICIO2018_2011.csv")).unwrap();

    assert!(pipeline::build(input.path(), output.path(), &test_config()).is_err());
}
