use std::fs;

use tempfile::TempDir;

use netpanel::centrality::{compute_features, CentralityConfig, FeatureTable, Metric};
use netpanel::graph::gml::{parse_gml_file, write_gml_file, GmlDocument};
use netpanel::graph::FlowGraph;

fn trade_graph() -> FlowGraph {
    let mut graph = FlowGraph::new();
    graph.add_edge("AUS", "CHN", 0.35);
    graph.add_edge("CHN", "USA", 1.0e-5);
    graph.add_edge("USA", "AUS", 0.125);
    graph.add_edge("USA", "CHN", 2.5);
    // JPN only receives, so its HHI is missing
    graph.add_edge("CHN", "JPN", 0.1);
    graph
}

#[test]
fn test_features_survive_a_gml_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("2010").join("B_country.gml");

    let graph = trade_graph();
    let features = compute_features(&graph, &CentralityConfig::default(), 0.0).unwrap();
    let mut doc = GmlDocument::new(graph.clone());
    doc.node_attributes = features.to_node_attributes();
    doc.graph_attributes.insert("year".to_string(), "2010".to_string());
    doc.graph_attributes.insert("network".to_string(), "goods".to_string());
    write_gml_file(&path, &doc).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("graph [\n  directed 1\n"));
    assert!(content.contains("label \"JPN\""));

    let back = parse_gml_file(&path).unwrap();
    assert_eq!(back.graph.nodes(), graph.nodes());
    assert_eq!(back.graph.edge_count(), graph.edge_count());
    assert_eq!(back.graph.edge_weight("CHN", "USA"), Some(1.0e-5));
    assert_eq!(back.graph_attributes["year"], "2010");
    assert_eq!(back.graph_attributes["network"], "goods");

    let restored = FeatureTable::from_document(&back);
    for (node, original) in features.iter() {
        let again = restored.get(node).unwrap();
        for metric in Metric::ALL {
            let (a, b) = (original.get(metric), again.get(metric));
            assert!(
                (a.is_nan() && b.is_nan()) || a == b,
                "{node} {metric}: {a} vs {b}"
            );
        }
    }
    assert!(restored.get("JPN").unwrap().get(Metric::HhiIndex).is_nan());
}

#[test]
fn test_hand_written_gml_is_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flows.gml");
    fs::write(
        &path,
        r#"# exported by hand
graph [
  directed 1
  comment "three countries"
  node [ id 10 label "DEU" graphics [ x 1.0 y 2.0 ] pagerank 0.5 ]
  node [ id 11 label "FRA" ]
  node [ id 12 ]
  edge [ source 10 target 11 weight 3.5 ]
  edge [ source 11 target 12 ]
]
"#,
    )
    .unwrap();

    let doc = parse_gml_file(&path).unwrap();
    assert_eq!(doc.graph.nodes(), &["DEU".to_string(), "FRA".to_string(), "12".to_string()][..]);
    assert_eq!(doc.graph.edge_weight("DEU", "FRA"), Some(3.5));
    assert_eq!(doc.graph.edge_weight("FRA", "12"), Some(1.0));
    assert_eq!(doc.node_attributes("DEU").unwrap()["pagerank"], 0.5);
    assert!(doc.node_attributes("FRA").is_none());
    assert_eq!(doc.graph_attributes["comment"], "three countries");
}

#[test]
fn test_dangling_edge_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.gml");
    fs::write(&path, "graph [ node [ id 0 label \"A\" ] edge [ source 0 target 7 ] ]").unwrap();

    let err = parse_gml_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("non-existent target node: 7"));
}
